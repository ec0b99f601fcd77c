use chrono::NaiveDate;
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A literal value held by a report cell.
///
/// Formulas are carried as `Text` beginning with `=`; the xlsx adapter maps
/// those onto real formula cells on save. There is deliberately no variant
/// for error values: handler failures are written as plain text so they stay
/// visible in the finished report.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Boolean(bool),
    Text(String),
    Date(NaiveDate),
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => write!(f, ""),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Boolean(b) => write!(f, "{b}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// True when the value is a formula string (leading `=`).
    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.starts_with('='))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Cast resolved template text into a typed value.
    ///
    /// Order matters: a date number format wins over numeric parsing so that
    /// `2024-03-05` in a date-formatted column becomes a date rather than a
    /// subtraction-looking string, then `true`/`false`, then finite floats.
    /// Anything else stays text, including formulas.
    pub fn cast_text(text: &str, number_format: Option<&str>) -> CellValue {
        if text.starts_with('=') {
            return CellValue::Text(text.to_string());
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }
        if let Some(fmt) = number_format
            && is_date_format(fmt)
            && let Some(d) = parse_date(trimmed)
        {
            return CellValue::Date(d);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Boolean(false);
        }
        if let Ok(n) = trimmed.parse::<f64>()
            && n.is_finite()
        {
            return CellValue::Number(n);
        }
        CellValue::Text(text.to_string())
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// Whether an Excel number format renders dates or times.
///
/// Mirrors the usual spreadsheet heuristic: any of `y m d h s` outside
/// quoted literals, `[...]` sections, and backslash escapes marks the format
/// as a date format.
pub fn is_date_format(fmt: &str) -> bool {
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                }
            }
            '\\' => {
                chars.next();
            }
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}
