//! Value-tag resolution.
//!
//! Template cells embed tags of the form `{path[:format][|blankText][|missingText]}`.
//! Tags are resolved against a per-row context. The scan runs backwards over
//! the text and matches the innermost unmatched brace pair first, so a tag
//! whose substitution contains literal braces is never re-parsed, while a tag
//! nested inside another tag's path is resolved before the outer one.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::error::Error;
use std::fmt;

/// Character in a tag path that is substituted with the row's item index
/// before lookup, e.g. `{qpcr.ct.#}`.
pub const INDEX_CHAR: char = '#';

/// A context value plus the recordset rows it was derived from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextEntry {
    pub value: String,
    pub rows: SmallVec<[usize; 4]>,
}

/// Tag-path lookup table for one expansion row. Paths are case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct RowContext {
    entries: FxHashMap<String, ContextEntry>,
    /// Item index substituted for `#` in tag paths.
    replicate: Option<String>,
}

impl RowContext {
    pub fn new() -> Self {
        RowContext::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            path.into().to_ascii_lowercase(),
            ContextEntry {
                value: value.into(),
                rows: SmallVec::new(),
            },
        );
    }

    /// Insert a value together with the recordset rows backing it.
    pub fn insert_with_rows(
        &mut self,
        path: impl Into<String>,
        value: impl Into<String>,
        rows: &[usize],
    ) {
        self.entries.insert(
            path.into().to_ascii_lowercase(),
            ContextEntry {
                value: value.into(),
                rows: SmallVec::from_slice(rows),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&ContextEntry> {
        self.entries.get(&path.to_ascii_lowercase())
    }

    pub fn set_replicate(&mut self, index: impl Into<String>) {
        self.replicate = Some(index.into());
    }

    pub fn replicate(&self) -> Option<&str> {
        self.replicate.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fatal tag syntax error with the byte position of the offending brace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagParseError {
    pub message: String,
    pub pos: usize,
}

impl TagParseError {
    fn new(message: impl Into<String>, pos: usize) -> Self {
        TagParseError {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for TagParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.pos)
    }
}

impl Error for TagParseError {}

/// Result of resolving all tags in one cell's text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagOutcome {
    pub text: String,
    /// Recordset rows contributed by every matched tag, deduplicated in
    /// match order.
    pub rows: Vec<usize>,
}

struct ParsedTag<'a> {
    path: &'a str,
    format: Option<&'a str>,
    blank: Option<&'a str>,
    missing: Option<&'a str>,
}

fn parse_tag(inner: &str, pos: usize) -> Result<ParsedTag<'_>, TagParseError> {
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == INDEX_CHAR as u8 {
            i += 1;
        } else {
            break;
        }
    }
    if i == 0 {
        return Err(TagParseError::new("empty tag path", pos));
    }
    let path = &inner[..i];
    let mut format = None;
    let mut rest = &inner[i..];
    if let Some(stripped) = rest.strip_prefix(':') {
        let end = stripped.find('|').unwrap_or(stripped.len());
        if stripped[..end].contains(char::is_whitespace) {
            return Err(TagParseError::new("whitespace in tag format", pos));
        }
        format = Some(&stripped[..end]);
        rest = &stripped[end..];
    }
    let (blank, missing) = match rest.strip_prefix('|') {
        None if rest.is_empty() => (None, None),
        None => return Err(TagParseError::new("malformed tag", pos)),
        Some(tail) => match tail.split_once('|') {
            None => (Some(tail), None),
            Some((b, m)) => (Some(b), Some(m)),
        },
    };
    Ok(ParsedTag {
        path,
        format,
        blank,
        missing,
    })
}

/// Apply the supported format subset: `.Nf` / `0.Nf` fixed precision and `d`
/// integer truncation. Unknown specs, or values that do not parse as
/// numbers, pass through unchanged.
fn apply_format(value: &str, spec: Option<&str>) -> String {
    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return value.to_string();
    };
    if spec == "d" {
        if let Ok(n) = value.trim().parse::<f64>() {
            return format!("{}", n.trunc() as i64);
        }
        return value.to_string();
    }
    let Some(body) = spec.strip_suffix('f') else {
        return value.to_string();
    };
    let precision = match body.split_once('.') {
        Some((width, prec)) if width.chars().all(|c| c.is_ascii_digit()) => {
            prec.parse::<usize>().ok()
        }
        None => body.parse::<usize>().ok(),
        _ => None,
    };
    match (precision, value.trim().parse::<f64>()) {
        (Some(p), Ok(n)) => format!("{n:.p$}"),
        _ => value.to_string(),
    }
}

fn is_blankish(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}

/// Resolve every tag in `text` against `ctx`.
///
/// Missing paths without a missingText fallback leave the tag intact.
/// Unbalanced braces are fatal.
pub fn resolve_tags(text: &str, ctx: &RowContext) -> Result<TagOutcome, TagParseError> {
    if !text.contains('{') && !text.contains('}') {
        return Ok(TagOutcome {
            text: text.to_string(),
            rows: Vec::new(),
        });
    }

    let mut out = text.to_string();
    let mut rows: Vec<usize> = Vec::new();
    // Positions of not-yet-matched closing braces to the right of the scan.
    let mut closers: Vec<usize> = Vec::new();
    let mut i = out.len();
    while i > 0 {
        i -= 1;
        match out.as_bytes()[i] {
            b'}' => closers.push(i),
            b'{' => {
                let Some(close) = closers.pop() else {
                    return Err(TagParseError::new("unmatched '{'", i));
                };
                let tag = parse_tag(&out[i + 1..close], i)?;
                let path = if tag.path.contains(INDEX_CHAR) {
                    match ctx.replicate() {
                        Some(r) => tag.path.replace(INDEX_CHAR, r),
                        None => tag.path.to_string(),
                    }
                } else {
                    tag.path.to_string()
                };
                let replacement = match ctx.get(&path) {
                    Some(entry) => {
                        for &row in &entry.rows {
                            if !rows.contains(&row) {
                                rows.push(row);
                            }
                        }
                        if is_blankish(&entry.value) {
                            match tag.blank {
                                Some(blank) => blank.to_string(),
                                None => entry.value.clone(),
                            }
                        } else {
                            apply_format(&entry.value, tag.format)
                        }
                    }
                    None => match tag.missing {
                        Some(missing) => missing.to_string(),
                        // Leave the tag intact; both braces are consumed.
                        None => continue,
                    },
                };
                let delta = replacement.len() as i64 - (close + 1 - i) as i64;
                out.replace_range(i..=close, &replacement);
                // Pending closers sit beyond the spliced span; shift them.
                for c in closers.iter_mut() {
                    *c = (*c as i64 + delta) as usize;
                }
            }
            _ => {}
        }
    }
    if let Some(&pos) = closers.last() {
        return Err(TagParseError::new("unmatched '}'", pos));
    }
    Ok(TagOutcome { text: out, rows })
}
