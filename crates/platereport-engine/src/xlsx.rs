//! xlsx IO through umya-spreadsheet.
//!
//! The engine model stays umya-free: template loading interns each cell's
//! full style into a [`StyleTable`] and hands the engine only an opaque id
//! plus the number format string. Saving maps everything back.

use crate::book::{CellStyle, OutputBook};
use crate::error::EngineError;
use crate::template::{TemplateBook, TemplateCell, TemplateRegion};
use chrono::NaiveDate;
use platereport_common::{CellValue, RangeRef};
use std::path::Path;
use tracing::debug;
use umya_spreadsheet::{Cell as UmyaCell, CellRawValue, Style, Worksheet};

/// Interned umya styles, addressed by the ids carried in [`CellStyle`].
#[derive(Clone, Debug, Default)]
pub struct StyleTable {
    styles: Vec<Style>,
}

impl StyleTable {
    pub fn new() -> Self {
        StyleTable::default()
    }

    pub fn intern(&mut self, style: Style) -> u32 {
        if let Some(i) = self.styles.iter().position(|s| *s == style) {
            return i as u32;
        }
        self.styles.push(style);
        (self.styles.len() - 1) as u32
    }

    pub fn get(&self, id: u32) -> Option<&Style> {
        self.styles.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

fn xlsx_err<E: std::fmt::Debug>(e: E) -> EngineError {
    EngineError::Xlsx(format!("{e:?}"))
}

/// Load a template workbook: every sheet becomes a region named by its
/// (lowercased) title, with row 1 / column A carrying the role metadata.
pub fn load_template(path: &Path) -> Result<(TemplateBook, StyleTable), EngineError> {
    let spreadsheet = umya_spreadsheet::reader::xlsx::read(path).map_err(xlsx_err)?;
    let mut book = TemplateBook::new();
    let mut styles = StyleTable::new();

    for ws in spreadsheet.get_sheet_collection() {
        let mut region = TemplateRegion::new(ws.get_name().to_lowercase());
        for cell in ws.get_cell_collection() {
            let col = *cell.get_coordinate().get_col_num();
            let row = *cell.get_coordinate().get_row_num();
            match (row, col) {
                (1, c) if c >= TemplateRegion::FIRST_COL => {
                    let idx = (c - TemplateRegion::FIRST_COL) as usize;
                    *ensure(&mut region.col_roles, idx) = split_roles(&cell_text(cell));
                }
                (r, 1) if r >= TemplateRegion::FIRST_ROW => {
                    let idx = (r - TemplateRegion::FIRST_ROW) as usize;
                    *ensure(&mut region.row_roles, idx) = split_roles(&cell_text(cell));
                }
                (r, c) if r >= TemplateRegion::FIRST_ROW && c >= TemplateRegion::FIRST_COL => {
                    let style = cell.get_style().clone();
                    let number_format = style
                        .get_number_format()
                        .map(|nf| nf.get_format_code().to_string());
                    let tcell = TemplateCell {
                        value: convert_value(cell),
                        style: CellStyle {
                            number_format,
                            style_id: Some(styles.intern(style)),
                        },
                    };
                    let r_idx = (r - TemplateRegion::FIRST_ROW) as usize;
                    let c_idx = (c - TemplateRegion::FIRST_COL) as usize;
                    let row_cells = ensure(&mut region.rows, r_idx);
                    while row_cells.len() <= c_idx {
                        row_cells.push(TemplateCell::default());
                    }
                    row_cells[c_idx] = tcell;
                }
                _ => {}
            }
        }
        // Role tables and content must agree on the row count.
        while region.row_roles.len() < region.rows.len() {
            region.row_roles.push(Vec::new());
        }
        while region.rows.len() < region.row_roles.len() {
            region.rows.push(Vec::new());
        }
        for merge in ws.get_merge_cells() {
            let text = merge.get_range().replace('$', "");
            if let Ok(range) = RangeRef::parse(&text) {
                region.merges.push(range);
            }
        }
        for column in ws.get_column_dimensions() {
            let col = *column.get_col_num();
            if col >= TemplateRegion::FIRST_COL {
                let idx = (col - TemplateRegion::FIRST_COL) as usize;
                *ensure(&mut region.col_widths, idx) = Some(*column.get_width());
            }
        }
        debug!(region = %region.name, rows = region.rows.len(), "template region loaded");
        book.add_region(region);
    }
    Ok((book, styles))
}

/// Persist the output book. Discarded sheets are skipped; formula text
/// (leading `=`) becomes real formulas; dates become serial numbers so the
/// authored number formats apply.
pub fn save_output(book: &OutputBook, styles: &StyleTable, path: &Path) -> Result<(), EngineError> {
    let mut out = umya_spreadsheet::new_file();
    let mut first = true;
    for (_, sheet) in book.iter() {
        if sheet.discarded {
            continue;
        }
        if first {
            if let Some(ws) = out.get_sheet_by_name_mut("Sheet1") {
                ws.set_name(sheet.title.as_str());
            }
            first = false;
        } else {
            let _ = out.new_sheet(sheet.title.as_str());
        }
        let Some(ws) = out.get_sheet_by_name_mut(&sheet.title) else {
            return Err(EngineError::UnknownSheet(sheet.title.clone()));
        };
        write_sheet(ws, sheet, styles);
    }
    umya_spreadsheet::writer::xlsx::write(&out, path).map_err(xlsx_err)
}

/// Save, reopen, and save again so formula results present in the file are
/// consistent with what a spreadsheet application would recalculate.
pub fn save_with_reopen(
    book: &OutputBook,
    styles: &StyleTable,
    path: &Path,
) -> Result<(), EngineError> {
    save_output(book, styles, path)?;
    let reloaded = umya_spreadsheet::reader::xlsx::read(path).map_err(xlsx_err)?;
    umya_spreadsheet::writer::xlsx::write(&reloaded, path).map_err(xlsx_err)
}

fn write_sheet(ws: &mut Worksheet, sheet: &crate::book::Sheet, styles: &StyleTable) {
    let mut coords: Vec<(&(u32, u32), &crate::book::Cell)> = sheet.cells().collect();
    coords.sort_by_key(|&(&(r, c), _)| (r, c));
    for (&(row, col), cell) in coords {
        let target = ws.get_cell_mut((col, row));
        match &cell.value {
            CellValue::Empty => {}
            CellValue::Number(n) => {
                target.set_value_number(*n);
            }
            CellValue::Boolean(b) => {
                target.set_value_bool(*b);
            }
            CellValue::Text(s) if s.starts_with('=') => {
                target.set_formula(&s[1..]);
            }
            CellValue::Text(s) => {
                target.set_value(s.as_str());
            }
            CellValue::Date(d) => {
                target.set_value_number(date_serial(*d));
            }
        }
        if let Some(style) = cell.style.style_id.and_then(|id| styles.get(id)) {
            target.set_style(style.clone());
        }
    }
    for merge in sheet.merges() {
        ws.add_merge_cells(&merge.a1());
    }
    for (col, width) in sheet.col_widths() {
        ws.get_column_dimension_by_number_mut(&col).set_width(width);
    }
}

/// Excel 1900-system serial for a date (post-1900-02-28 dates only, which
/// covers every plausible analysis date).
fn date_serial(date: NaiveDate) -> f64 {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(date);
    (date - base).num_days() as f64
}

fn cell_text(cell: &UmyaCell) -> String {
    match convert_value(cell) {
        CellValue::Text(s) => s,
        other => other.to_string(),
    }
}

fn convert_value(cell: &UmyaCell) -> CellValue {
    let cv = cell.get_cell_value();
    if cv.is_formula() {
        return CellValue::Text(format!("={}", cv.get_formula()));
    }
    match cv.get_raw_value() {
        CellRawValue::Numeric(n) => CellValue::Number(*n),
        CellRawValue::Bool(b) => CellValue::Boolean(*b),
        CellRawValue::String(s) => CellValue::Text(s.to_string()),
        CellRawValue::Lazy(s) => CellValue::Text(s.to_string()),
        _ => CellValue::Empty,
    }
}

fn split_roles(text: &str) -> Vec<String> {
    text.split(',')
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(|r| r.to_string())
        .collect()
}

fn ensure<T: Default>(table: &mut Vec<T>, idx: usize) -> &mut T {
    while table.len() <= idx {
        table.push(T::default());
    }
    &mut table[idx]
}
