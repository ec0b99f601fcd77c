//! In-memory output document model.
//!
//! The engine never writes xlsx directly while populating; it builds an
//! [`OutputBook`] and hands it to the adapter in `xlsx` at the end. Styles
//! are opaque here: a cell carries an optional id into a style table owned
//! by the adapter, plus the number format, which the engine itself needs for
//! value casting.

use platereport_common::{CellValue, RangeRef, SheetId};
use rustc_hash::FxHashMap;

/// Style attached to a cell. `style_id` points into the adapter's style
/// table; `number_format` is duplicated here because casting consults it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellStyle {
    pub number_format: Option<String>,
    pub style_id: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub style: CellStyle,
    /// Recordset rows this cell was derived from.
    pub sources: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct Sheet {
    pub title: String,
    cells: FxHashMap<(u32, u32), Cell>,
    merges: Vec<RangeRef>,
    col_widths: FxHashMap<u32, f64>,
    pub freeze_panes: Option<String>,
    /// Discarded sheets are skipped on save (hidden calibration placement).
    pub discarded: bool,
}

impl Sheet {
    pub fn new(title: impl Into<String>) -> Self {
        Sheet {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn cell_mut(&mut self, row: u32, col: u32) -> &mut Cell {
        self.cells.entry((row, col)).or_default()
    }

    pub fn value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cell(row, col).map(|c| &c.value)
    }

    pub fn set_value(&mut self, row: u32, col: u32, value: CellValue) {
        self.cell_mut(row, col).value = value;
    }

    /// Display text of a cell, empty string for unwritten cells.
    pub fn text(&self, row: u32, col: u32) -> String {
        self.value(row, col).map(|v| v.to_string()).unwrap_or_default()
    }

    pub fn merge(&mut self, range: RangeRef) {
        if !self.merges.contains(&range) {
            self.merges.push(range);
        }
    }

    pub fn merges(&self) -> &[RangeRef] {
        &self.merges
    }

    pub fn set_col_width(&mut self, col: u32, width: f64) {
        self.col_widths.insert(col, width);
    }

    pub fn col_widths(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.col_widths.iter().map(|(&c, &w)| (c, w))
    }

    pub fn cells(&self) -> impl Iterator<Item = (&(u32, u32), &Cell)> {
        self.cells.iter()
    }

    pub fn max_row(&self) -> u32 {
        self.cells.keys().map(|&(r, _)| r).max().unwrap_or(0)
    }

    pub fn max_col(&self) -> u32 {
        self.cells.keys().map(|&(_, c)| c).max().unwrap_or(0)
    }
}

/// The output document: a flat list of physical sheets addressed by
/// [`SheetId`]. Ids are stable for the lifetime of the book.
#[derive(Clone, Debug, Default)]
pub struct OutputBook {
    sheets: Vec<Sheet>,
}

impl OutputBook {
    pub fn new() -> Self {
        OutputBook::default()
    }

    pub fn add_sheet(&mut self, title: impl Into<String>) -> SheetId {
        let id = self.sheets.len() as SheetId;
        self.sheets.push(Sheet::new(title));
        id
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(id as usize)
    }

    pub fn sheet_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.get_mut(id as usize)
    }

    pub fn by_title(&self, title: &str) -> Option<SheetId> {
        self.sheets
            .iter()
            .position(|s| s.title == title)
            .map(|i| i as SheetId)
    }

    pub fn get_or_add(&mut self, title: &str) -> SheetId {
        match self.by_title(title) {
            Some(id) => id,
            None => self.add_sheet(title),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SheetId, &Sheet)> {
        self.sheets
            .iter()
            .enumerate()
            .map(|(i, s)| (i as SheetId, s))
    }

    pub fn title(&self, id: SheetId) -> Option<&str> {
        self.sheet(id).map(|s| s.title.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platereport_common::CellRef;

    #[test]
    fn sheets_get_stable_ids() {
        let mut book = OutputBook::new();
        let a = book.add_sheet("Main");
        let b = book.add_sheet("Cal");
        assert_eq!(book.by_title("Cal"), Some(b));
        assert_eq!(book.get_or_add("Main"), a);
        assert_eq!(book.get_or_add("Extra"), 2);
        assert_eq!(book.title(a), Some("Main"));
    }

    #[test]
    fn cell_writes_and_extents() {
        let mut sheet = Sheet::new("Main");
        assert_eq!(sheet.max_row(), 0);
        sheet.set_value(4, 2, CellValue::Number(1.0));
        sheet.set_value(2, 7, CellValue::Text("x".into()));
        assert_eq!(sheet.max_row(), 4);
        assert_eq!(sheet.max_col(), 7);
        assert_eq!(sheet.text(4, 2), "1");
        assert_eq!(sheet.text(9, 9), "");
    }

    #[test]
    fn merges_are_deduplicated() {
        let mut sheet = Sheet::new("Main");
        let r = RangeRef::new(CellRef::new(1, 1), CellRef::new(1, 3));
        sheet.merge(r);
        sheet.merge(r);
        assert_eq!(sheet.merges().len(), 1);
    }
}
