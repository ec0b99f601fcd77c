//! Formula reference rewriting for template-row copies.
//!
//! Template formulas are authored at the template's own coordinates. When a
//! row is stamped into the output, `$` anchors are stripped first (template
//! anchors describe the template, not the output) and every relative
//! reference is then shifted by the copy delta.

use platereport_common::{CellRef, col_to_letters};

/// Remove `$` anchors that precede a column letter or row number.
/// Other `$` characters (currency text) are left alone.
pub fn strip_anchors(formula: &str) -> String {
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len());
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'$' {
            let prev = if i > 0 { Some(bytes[i - 1]) } else { None };
            let next = bytes.get(i + 1);
            let before_col = next.is_some_and(|n| n.is_ascii_alphabetic())
                && !prev.is_some_and(|p| p.is_ascii_alphanumeric());
            let before_row = next.is_some_and(|n| n.is_ascii_digit())
                && !prev.is_some_and(|p| p.is_ascii_digit());
            if before_col || before_row {
                continue;
            }
        }
        out.push(b as char);
    }
    out
}

/// Shift every relative cell reference in `formula` by the delta between
/// `from` and `to`. Anchored axes stay put; string literals are skipped;
/// names directly followed by `(` are treated as function calls.
pub fn rebase(formula: &str, from: CellRef, to: CellRef) -> String {
    let d_row = to.row as i64 - from.row as i64;
    let d_col = to.col as i64 - from.col as i64;
    if d_row == 0 && d_col == 0 {
        return formula.to_string();
    }

    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len());
    let mut i = 0;
    let mut in_str = false;
    let mut in_sheet = false;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' && !in_sheet {
            in_str = !in_str;
        }
        if b == b'\'' && !in_str {
            in_sheet = !in_sheet;
        }
        if in_str || in_sheet || b == b'"' || b == b'\'' {
            out.push(b as char);
            i += 1;
            continue;
        }
        let boundary = i == 0 || !is_ident_byte(bytes[i - 1]) && bytes[i - 1] != b'$';
        if boundary && (b == b'$' || b.is_ascii_alphabetic()) {
            if let Some((token, len)) = scan_ref(bytes, i) {
                out.push_str(&shift_ref(&token, d_row, d_col));
                i += len;
                continue;
            }
            // Not a reference; emit the identifier run untouched so its
            // letters cannot start a bogus match.
            let start = i;
            i += 1;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            out.push_str(&formula[start..i]);
            continue;
        }
        out.push(b as char);
        i += 1;
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

/// Try to scan `$?A-Z{1,3}$?[0-9]+` at `start`, rejecting identifiers and
/// function names. Returns the token text and its byte length.
fn scan_ref(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    let col_abs = bytes.get(i) == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = i - letters_start;
    if letters == 0 || letters > 3 {
        return None;
    }
    let row_abs = bytes.get(i) == Some(&b'$');
    if row_abs {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    match bytes.get(i) {
        Some(&n) if is_ident_byte(n) || n == b'(' => return None,
        _ => {}
    }
    let token = std::str::from_utf8(&bytes[start..i]).ok()?.to_string();
    Some((token, i - start))
}

fn shift_ref(token: &str, d_row: i64, d_col: i64) -> String {
    let Ok(cell) = CellRef::parse(token) else {
        return token.to_string();
    };
    let col = if cell.col_abs {
        cell.col
    } else {
        (cell.col as i64 + d_col).max(1) as u32
    };
    let row = if cell.row_abs {
        cell.row
    } else {
        (cell.row as i64 + d_row).max(1) as u32
    };
    let mut s = String::new();
    if cell.col_abs {
        s.push('$');
    }
    s.push_str(&col_to_letters(col));
    if cell.row_abs {
        s.push('$');
    }
    s.push_str(&row.to_string());
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(row: u32, col: u32) -> CellRef {
        CellRef::new(row, col)
    }

    #[test]
    fn anchors_are_stripped() {
        assert_eq!(strip_anchors("=$B$4+C$2-$D7"), "=B4+C2-D7");
        assert_eq!(strip_anchors("=SUM($A$1:$A$10)"), "=SUM(A1:A10)");
        // A $ inside text is not an anchor.
        assert_eq!(strip_anchors("=\"cost: 5$\"&A1"), "=\"cost: 5$\"&A1");
    }

    #[test]
    fn relative_refs_shift_by_the_copy_delta() {
        assert_eq!(rebase("=B2+C2", at(2, 1), at(10, 1)), "=B10+C10");
        assert_eq!(rebase("=B2", at(2, 2), at(5, 4)), "=D5");
    }

    #[test]
    fn anchored_axes_stay_put() {
        assert_eq!(rebase("=$B$2+B$2+$B2", at(2, 2), at(5, 4)), "=$B$2+D$2+$B5");
    }

    #[test]
    fn function_names_and_identifiers_survive() {
        assert_eq!(rebase("=LOG10(B2)", at(2, 1), at(4, 1)), "=LOG10(B4)");
        assert_eq!(rebase("=SUM(A1:C1)", at(1, 1), at(3, 2)), "=SUM(B3:D3)");
        assert_eq!(rebase("=TRUE", at(1, 1), at(2, 2)), "=TRUE");
    }

    #[test]
    fn string_literals_are_not_rewritten() {
        assert_eq!(
            rebase("=\"see B2\"&B2", at(2, 1), at(3, 1)),
            "=\"see B2\"&B3"
        );
    }

    #[test]
    fn shifts_clamp_at_the_sheet_edge() {
        assert_eq!(rebase("=A1", at(5, 5), at(1, 1)), "=A1");
    }

    #[test]
    fn sheet_qualified_refs_shift_too() {
        assert_eq!(
            rebase("='Cal-N1-P1'!B2", at(2, 1), at(4, 1)),
            "='Cal-N1-P1'!B4"
        );
    }
}
