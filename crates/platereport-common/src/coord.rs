//! 1-based A1 coordinates and ranges used throughout the populator.

use std::error::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable physical-sheet identifier inside an output book.
pub type SheetId = u16;

/// Error raised when A1 text cannot be parsed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct A1ParseError {
    pub message: String,
}

impl A1ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        A1ParseError {
            message: message.into(),
        }
    }
}

impl fmt::Display for A1ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid A1 reference: {}", self.message)
    }
}

impl Error for A1ParseError {}

/// Convert a 1-based column number to its letter form (1 -> "A", 27 -> "AA").
pub fn col_to_letters(col: u32) -> String {
    debug_assert!(col >= 1);
    let mut n = col;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Convert column letters to a 1-based column number. Case-insensitive.
pub fn letters_to_col(letters: &str) -> Result<u32, A1ParseError> {
    if letters.is_empty() {
        return Err(A1ParseError::new("empty column letters"));
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return Err(A1ParseError::new(format!("bad column letter in {letters:?}")));
        }
        col = col * 26 + (c as u32 - 'A' as u32 + 1);
    }
    Ok(col)
}

/// A single cell position with optional absolute anchors.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
    pub row_abs: bool,
    pub col_abs: bool,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        CellRef {
            row,
            col,
            row_abs: false,
            col_abs: false,
        }
    }

    pub fn with_anchors(row: u32, col: u32, row_abs: bool, col_abs: bool) -> Self {
        CellRef {
            row,
            col,
            row_abs,
            col_abs,
        }
    }

    /// Return the same position with `$` anchors applied per axis.
    pub fn anchored(self, fix_rows: bool, fix_cols: bool) -> Self {
        CellRef {
            row_abs: fix_rows,
            col_abs: fix_cols,
            ..self
        }
    }

    /// Shift by a signed delta, clamping at row/column 1.
    pub fn offset(self, d_row: i64, d_col: i64) -> Self {
        let row = (self.row as i64 + d_row).max(1) as u32;
        let col = (self.col as i64 + d_col).max(1) as u32;
        CellRef { row, col, ..self }
    }

    pub fn a1(&self) -> String {
        let mut s = String::new();
        if self.col_abs {
            s.push('$');
        }
        s.push_str(&col_to_letters(self.col));
        if self.row_abs {
            s.push('$');
        }
        s.push_str(&self.row.to_string());
        s
    }

    /// Sheet-qualified form, always quoted: `'Cal-N1-P1'!$B$4`.
    pub fn qualified(&self, sheet: &str) -> String {
        format!("'{}'!{}", sheet, self.a1())
    }

    pub fn parse(text: &str) -> Result<Self, A1ParseError> {
        let bytes = text.as_bytes();
        let mut i = 0;
        let col_abs = bytes.first() == Some(&b'$');
        if col_abs {
            i += 1;
        }
        let col_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        if i == col_start {
            return Err(A1ParseError::new(format!("missing column in {text:?}")));
        }
        let col = letters_to_col(&text[col_start..i])?;
        let row_abs = bytes.get(i) == Some(&b'$');
        if row_abs {
            i += 1;
        }
        let row_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == row_start || i != bytes.len() {
            return Err(A1ParseError::new(format!("missing row in {text:?}")));
        }
        let row: u32 = text[row_start..i]
            .parse()
            .map_err(|_| A1ParseError::new(format!("row out of range in {text:?}")))?;
        if row == 0 {
            return Err(A1ParseError::new("row numbers are 1-based"));
        }
        Ok(CellRef {
            row,
            col,
            row_abs,
            col_abs,
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.a1())
    }
}

/// An inclusive rectangular range.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RangeRef {
    pub start: CellRef,
    pub end: CellRef,
}

impl RangeRef {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        RangeRef { start, end }
    }

    pub fn single(cell: CellRef) -> Self {
        RangeRef {
            start: cell,
            end: cell,
        }
    }

    pub fn is_single(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    pub fn width(&self) -> u32 {
        self.end.col.saturating_sub(self.start.col) + 1
    }

    pub fn height(&self) -> u32 {
        self.end.row.saturating_sub(self.start.row) + 1
    }

    pub fn anchored(self, fix_rows: bool, fix_cols: bool) -> Self {
        RangeRef {
            start: self.start.anchored(fix_rows, fix_cols),
            end: self.end.anchored(fix_rows, fix_cols),
        }
    }

    /// `A1:B2`, collapsing to a single address when start == end.
    pub fn a1(&self) -> String {
        if self.is_single() {
            self.start.a1()
        } else {
            format!("{}:{}", self.start.a1(), self.end.a1())
        }
    }

    pub fn qualified(&self, sheet: &str) -> String {
        format!("'{}'!{}", sheet, self.a1())
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.start.row && row <= self.end.row && col >= self.start.col && col <= self.end.col
    }

    pub fn parse(text: &str) -> Result<Self, A1ParseError> {
        match text.split_once(':') {
            Some((a, b)) => Ok(RangeRef {
                start: CellRef::parse(a)?,
                end: CellRef::parse(b)?,
            }),
            None => Ok(RangeRef::single(CellRef::parse(text)?)),
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.a1())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_round_trip() {
        for (n, s) in [(1, "A"), (26, "Z"), (27, "AA"), (52, "AZ"), (703, "AAA")] {
            assert_eq!(col_to_letters(n), s);
            assert_eq!(letters_to_col(s).unwrap(), n);
        }
        assert_eq!(letters_to_col("aa").unwrap(), 27);
    }

    #[test]
    fn a1_parse_and_format() {
        let c = CellRef::parse("B4").unwrap();
        assert_eq!((c.row, c.col), (4, 2));
        assert!(!c.row_abs && !c.col_abs);
        assert_eq!(c.a1(), "B4");

        let c = CellRef::parse("$AB$10").unwrap();
        assert_eq!((c.row, c.col), (10, 28));
        assert!(c.row_abs && c.col_abs);
        assert_eq!(c.a1(), "$AB$10");

        let c = CellRef::parse("C$7").unwrap();
        assert!(c.row_abs && !c.col_abs);
        assert_eq!(c.a1(), "C$7");

        assert!(CellRef::parse("4B").is_err());
        assert!(CellRef::parse("B0").is_err());
        assert!(CellRef::parse("").is_err());
    }

    #[test]
    fn qualified_addresses_quote_the_sheet() {
        let c = CellRef::new(4, 2).anchored(true, true);
        assert_eq!(c.qualified("Cal-N1-P1"), "'Cal-N1-P1'!$B$4");
    }

    #[test]
    fn ranges_collapse_single_cells() {
        let r = RangeRef::parse("B2:D5").unwrap();
        assert_eq!((r.width(), r.height()), (3, 4));
        assert_eq!(r.a1(), "B2:D5");
        assert!(r.contains(3, 3));
        assert!(!r.contains(6, 3));

        let s = RangeRef::single(CellRef::new(2, 2));
        assert_eq!(s.a1(), "B2");
        assert_eq!(s.anchored(true, false).a1(), "B$2");
    }

    #[test]
    fn offset_clamps_at_one() {
        let c = CellRef::new(2, 3).offset(-5, 1);
        assert_eq!((c.row, c.col), (1, 4));
    }
}
