//! Template row expansion.
//!
//! Stamps template rows onto an output sheet: tags resolve first, then
//! custom calls run (or are queued), then the text is cast and styled.
//! Formulas are rebased from their authoring coordinates to the target.

use crate::book::OutputBook;
use crate::config::PopulatorConfig;
use crate::defer::DeferredQueue;
use crate::error::EngineError;
use crate::funcs::{ExpansionContext, run_calls};
use crate::region::RegionIndex;
use crate::template::{TemplateRegion, TemplateCell};
use platereport_common::{CellRef, CellValue, MeasurementRow, RangeRef};
use platereport_template::{RowContext, rebase, resolve_tags, strip_anchors};

pub struct Expander<'a> {
    pub book: &'a mut OutputBook,
    pub index: &'a mut RegionIndex,
    pub rows: &'a [MeasurementRow],
    pub config: &'a PopulatorConfig,
    pub queue: &'a mut DeferredQueue,
}

impl Expander<'_> {
    /// Stamp every template row tagged `role`, appending below the logical
    /// sheet's extents. Returns the number of rows written.
    pub fn copy_rows(
        &mut self,
        region: &TemplateRegion,
        role: &str,
        sheet: &str,
        ctx: &RowContext,
        sources: &[usize],
    ) -> Result<u32, EngineError> {
        let template_rows: Vec<usize> = region.rows_with_role(role).collect();
        for template_row in &template_rows {
            self.copy_row(region, *template_row, sheet, ctx, sources, None)?;
        }
        Ok(template_rows.len() as u32)
    }

    /// Stamp one template row at `at`, or below the extents when `None`.
    pub fn copy_row(
        &mut self,
        region: &TemplateRegion,
        template_row: usize,
        sheet: &str,
        ctx: &RowContext,
        sources: &[usize],
        at: Option<(u32, u32)>,
    ) -> Result<(), EngineError> {
        let (target_row, target_col, sheet_id) = {
            let info = self
                .index
                .get(sheet)
                .ok_or_else(|| EngineError::UnknownSheet(sheet.to_string()))?;
            match at {
                Some((r, c)) => (r, c, info.sheet),
                None => (info.extents.0 + 1, info.origin.1, info.sheet),
            }
        };
        let cells = region.rows.get(template_row).ok_or_else(|| {
            EngineError::MissingRegion(format!("{} row {template_row}", region.name))
        })?;

        for (c_idx, tcell) in cells.iter().enumerate() {
            let target = CellRef::new(target_row, target_col + c_idx as u32);
            self.write_cell(template_row, c_idx, tcell, sheet, target, ctx, sources)?;
        }

        if let Some(info) = self.index.get_mut(sheet) {
            for role in region.row_roles.get(template_row).into_iter().flatten() {
                info.add_row_role(target_row, role);
            }
            info.add_row_sources(target_row, sources);
            info.extents.0 = info.extents.0.max(target_row);
            info.extents.1 = info
                .extents
                .1
                .max(target_col + cells.len().saturating_sub(1) as u32);
        }

        if let Some(out) = self.book.sheet_mut(sheet_id) {
            for (c0, c1) in region.row_merges(template_row) {
                out.merge(RangeRef::new(
                    CellRef::new(target_row, target_col + c0),
                    CellRef::new(target_row, target_col + c1),
                ));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_cell(
        &mut self,
        template_row: usize,
        c_idx: usize,
        tcell: &TemplateCell,
        sheet: &str,
        target: CellRef,
        ctx: &RowContext,
        sources: &[usize],
    ) -> Result<(), EngineError> {
        let sheet_id = match self.index.get(sheet) {
            Some(info) => info.sheet,
            None => return Err(EngineError::UnknownSheet(sheet.to_string())),
        };
        let (value, tag_rows) = match &tcell.value {
            CellValue::Text(text) => {
                let outcome = resolve_tags(text, ctx)?;
                let mut ectx = ExpansionContext {
                    book: &mut *self.book,
                    index: &mut *self.index,
                    rows: self.rows,
                    config: self.config,
                };
                let text = run_calls(
                    outcome.text,
                    &mut ectx,
                    sheet,
                    target,
                    ctx,
                    Some(&mut *self.queue),
                    None,
                );
                let text = if text.starts_with('=') {
                    let authored = CellRef::new(
                        template_row as u32 + TemplateRegion::FIRST_ROW,
                        c_idx as u32 + TemplateRegion::FIRST_COL,
                    );
                    rebase(&strip_anchors(&text), authored, target)
                } else {
                    text
                };
                (
                    CellValue::cast_text(&text, tcell.style.number_format.as_deref()),
                    outcome.rows,
                )
            }
            other => (other.clone(), Vec::new()),
        };

        if let Some(out) = self.book.sheet_mut(sheet_id) {
            let cell = out.cell_mut(target.row, target.col);
            cell.value = value;
            cell.style = tcell.style.clone();
            for &s in tag_rows.iter().chain(sources) {
                if !cell.sources.contains(&s) {
                    cell.sources.push(s);
                }
            }
        }
        Ok(())
    }

    /// Copy authored column widths onto the logical sheet's columns.
    pub fn copy_widths(&mut self, region: &TemplateRegion, sheet: &str) {
        let Some(info) = self.index.get(sheet) else {
            return;
        };
        let (sheet_id, first_col) = (info.sheet, info.origin.1);
        if let Some(out) = self.book.sheet_mut(sheet_id) {
            for (i, width) in region.col_widths.iter().enumerate() {
                if let Some(w) = width {
                    out.set_col_width(first_col + i as u32, *w);
                }
            }
        }
    }
}
