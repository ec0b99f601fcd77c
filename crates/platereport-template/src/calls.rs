//! Custom function call scanning.
//!
//! Calls look like `__NAME(arg; arg)` inside cell text. The scanner reports
//! the span to replace: when the call is directly preceded by the argument
//! separator the separator is part of the span, so a list such as
//! `a;__UPPER(b);c` collapses cleanly when the call is substituted.

use std::ops::Range;

/// Separator between arguments and between stacked calls.
pub const ARG_SEPARATOR: char = ';';

/// One scanned call site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallMatch {
    /// Function name including the `__` prefix.
    pub name: String,
    /// Arguments: comma-split, trimmed, outer quotes stripped. Empty when
    /// the parentheses held nothing.
    pub args: Vec<String>,
    /// Span of text to remove on substitution (leading separator included).
    pub span: Range<usize>,
    /// Where the `__` prefix begins. Scans resume at `name_start + 1` so a
    /// substitution that itself contains calls is picked up.
    pub name_start: usize,
}

/// Find the next call at or after `from`. With `filter` set, only calls with
/// that exact name match; others are skipped.
pub fn find_call(text: &str, from: usize, filter: Option<&str>) -> Option<CallMatch> {
    let bytes = text.as_bytes();
    let mut i = from.min(text.len());
    loop {
        let rel = text.get(i..)?.find("__")?;
        let name_start = i + rel;
        match scan_at(text, bytes, name_start) {
            Some(m) if filter.is_none_or(|f| f == m.name) => return Some(m),
            _ => i = name_start + 1,
        }
    }
}

fn scan_at(text: &str, bytes: &[u8], name_start: usize) -> Option<CallMatch> {
    let mut i = name_start + 2;
    let ident_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == ident_start || !bytes[ident_start].is_ascii_alphabetic() {
        return None;
    }
    if bytes.get(i) != Some(&b'(') {
        return None;
    }
    let args_start = i + 1;
    let close = text[args_start..].find(')')? + args_start;
    let inner = &text[args_start..close];
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner
            .split(',')
            .map(|a| strip_quotes(a.trim()).to_string())
            .collect()
    };
    let start = if name_start > 0 && bytes[name_start - 1] == ARG_SEPARATOR as u8 {
        name_start - 1
    } else {
        name_start
    };
    Some(CallMatch {
        name: text[name_start..i].to_string(),
        args,
        span: start..close + 1,
        name_start,
    })
}

/// Strip one pair of matching outer quotes, double or single.
pub fn strip_quotes(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 {
        let (first, last) = (b[0], b[b.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &s[1..s.len() - 1];
        }
    }
    s
}
