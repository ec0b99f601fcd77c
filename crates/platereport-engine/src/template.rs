//! Template document model.
//!
//! A template region is one authored sheet: row 1 carries comma-separated
//! column role names, column A carries comma-separated row role names, and
//! the content proper starts at B2. Region content is stored 0-based from
//! that corner; [`TemplateRegion::FIRST_ROW`]/[`FIRST_COL`] give the
//! authoring coordinates back when formulas need rebasing.

use crate::book::CellStyle;
use platereport_common::{CellValue, RangeRef};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateCell {
    pub value: CellValue,
    pub style: CellStyle,
}

impl TemplateCell {
    pub fn text(value: impl Into<String>) -> Self {
        TemplateCell {
            value: CellValue::Text(value.into()),
            style: CellStyle::default(),
        }
    }

    pub fn value(value: CellValue) -> Self {
        TemplateCell {
            value,
            style: CellStyle::default(),
        }
    }

    pub fn with_number_format(mut self, fmt: impl Into<String>) -> Self {
        self.style.number_format = Some(fmt.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct TemplateRegion {
    /// Region key, matched case-insensitively.
    pub name: String,
    /// Role names per template column (index 0 = column B).
    pub col_roles: Vec<Vec<String>>,
    /// Role names per template row (index 0 = row 2).
    pub row_roles: Vec<Vec<String>>,
    /// Cell content, row-major from B2.
    pub rows: Vec<Vec<TemplateCell>>,
    /// Merged ranges in authoring coordinates.
    pub merges: Vec<RangeRef>,
    /// Authored column widths per template column.
    pub col_widths: Vec<Option<f64>>,
}

impl TemplateRegion {
    /// First content row/column in authoring coordinates.
    pub const FIRST_ROW: u32 = 2;
    pub const FIRST_COL: u32 = 2;

    pub fn new(name: impl Into<String>) -> Self {
        TemplateRegion {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a content row with its role names.
    pub fn push_row(&mut self, roles: &[&str], cells: Vec<TemplateCell>) {
        self.row_roles
            .push(roles.iter().map(|r| r.to_string()).collect());
        self.rows.push(cells);
    }

    pub fn set_col_roles(&mut self, roles: &[&[&str]]) {
        self.col_roles = roles
            .iter()
            .map(|cols| cols.iter().map(|r| r.to_string()).collect())
            .collect();
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&TemplateCell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Indices of content rows tagged with `role`.
    pub fn rows_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.row_roles
            .iter()
            .enumerate()
            .filter(move |(_, roles)| roles.iter().any(|r| r == role))
            .map(|(i, _)| i)
    }

    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.len())
            .max()
            .unwrap_or(0)
            .max(self.col_roles.len())
    }

    /// Merges that lie entirely on one content row (the only kind the
    /// expander reproduces), in 0-based content coordinates.
    pub fn row_merges(&self, row: usize) -> impl Iterator<Item = (u32, u32)> + '_ {
        let authored = row as u32 + Self::FIRST_ROW;
        self.merges
            .iter()
            .filter(move |m| m.start.row == authored && m.end.row == authored)
            .filter(|m| m.start.col >= Self::FIRST_COL)
            .map(|m| (m.start.col - Self::FIRST_COL, m.end.col - Self::FIRST_COL))
    }
}

#[derive(Clone, Debug, Default)]
pub struct TemplateBook {
    regions: Vec<TemplateRegion>,
}

impl TemplateBook {
    pub fn new() -> Self {
        TemplateBook::default()
    }

    pub fn add_region(&mut self, region: TemplateRegion) {
        self.regions.push(region);
    }

    pub fn region(&self, name: &str) -> Option<&TemplateRegion> {
        self.regions
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn regions(&self) -> &[TemplateRegion] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platereport_common::CellRef;

    fn region() -> TemplateRegion {
        let mut r = TemplateRegion::new("main");
        r.set_col_roles(&[&["label"], &["ct"]]);
        r.push_row(&["banner"], vec![TemplateCell::text("Report")]);
        r.push_row(
            &["header"],
            vec![TemplateCell::text("Sample"), TemplateCell::text("Ct")],
        );
        r.push_row(
            &["data"],
            vec![
                TemplateCell::text("{sample.id}"),
                TemplateCell::text("{qpcr.ctavg:.2f}"),
            ],
        );
        r.push_row(&["data", "alt"], vec![TemplateCell::text("x")]);
        r
    }

    #[test]
    fn role_lookup_finds_all_tagged_rows() {
        let r = region();
        assert_eq!(r.rows_with_role("data").collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(r.rows_with_role("banner").collect::<Vec<_>>(), vec![0]);
        assert_eq!(r.rows_with_role("missing").count(), 0);
        assert_eq!(r.width(), 2);
    }

    #[test]
    fn region_lookup_is_case_insensitive() {
        let mut book = TemplateBook::new();
        book.add_region(region());
        assert!(book.region("Main").is_some());
        assert!(book.region("calibration").is_none());
    }

    #[test]
    fn row_merges_are_horizontal_only() {
        let mut r = region();
        // B2:D2 (banner) and a vertical merge that must be ignored.
        r.merges.push(RangeRef::new(CellRef::new(2, 2), CellRef::new(2, 4)));
        r.merges.push(RangeRef::new(CellRef::new(3, 2), CellRef::new(4, 2)));
        assert_eq!(r.row_merges(0).collect::<Vec<_>>(), vec![(0, 2)]);
        assert_eq!(r.row_merges(1).count(), 0);
    }
}
