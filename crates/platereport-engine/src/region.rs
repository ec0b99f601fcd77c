//! Named region index.
//!
//! A logical sheet is one expanded region instance (the main table, or one
//! calibration block). Several logical sheets may share a physical sheet;
//! each keeps its own origin, extents, role tables, and named cells. Role
//! names are stored qualified with the logical sheet name so two regions on
//! one physical sheet cannot collide.

use crate::curve::CalibrationCurve;
use platereport_common::{CellRef, RangeRef, SheetId};
use rustc_hash::FxHashMap;

/// Qualified form of a role name: `{logical-sheet}-{role}`.
pub fn qualified_role(sheet: &str, role: &str) -> String {
    format!("{sheet}-{role}")
}

/// Expansion state for one logical sheet.
#[derive(Clone, Debug)]
pub struct LogicalSheetInfo {
    pub name: String,
    pub sheet: SheetId,
    /// First row/col this region writes to.
    pub origin: (u32, u32),
    /// Last row/col written so far; rows append at `extents.0 + 1`.
    pub extents: (u32, u32),
    /// Qualified role names per 0-based absolute column.
    pub col_roles: Vec<Vec<String>>,
    /// Qualified role names per 0-based absolute row.
    pub row_roles: Vec<Vec<String>>,
    /// Recordset rows backing each 0-based absolute row.
    pub row_sources: Vec<Vec<usize>>,
    /// Cells registered by id (SETCELL and curve layout).
    pub named_cells: FxHashMap<String, CellRef>,
    pub curve: Option<CalibrationCurve>,
    pub plate_id: String,
    pub target_name: String,
}

impl LogicalSheetInfo {
    pub fn new(name: impl Into<String>, sheet: SheetId, origin: (u32, u32)) -> Self {
        let origin = (origin.0.max(1), origin.1.max(1));
        LogicalSheetInfo {
            name: name.into(),
            sheet,
            origin,
            // Nothing written yet: extents sit one row above the origin.
            extents: (origin.0 - 1, origin.1),
            col_roles: Vec::new(),
            row_roles: Vec::new(),
            row_sources: Vec::new(),
            named_cells: FxHashMap::default(),
            curve: None,
            plate_id: String::new(),
            target_name: String::new(),
        }
    }

    pub fn add_row_role(&mut self, row: u32, role: &str) {
        let qualified = qualified_role(&self.name, role);
        let slot = ensure(&mut self.row_roles, row as usize - 1);
        if !slot.contains(&qualified) {
            slot.push(qualified);
        }
    }

    pub fn add_col_role(&mut self, col: u32, role: &str) {
        let qualified = qualified_role(&self.name, role);
        let slot = ensure(&mut self.col_roles, col as usize - 1);
        if !slot.contains(&qualified) {
            slot.push(qualified);
        }
    }

    pub fn add_row_sources(&mut self, row: u32, sources: &[usize]) {
        let slot = ensure(&mut self.row_sources, row as usize - 1);
        for &s in sources {
            if !slot.contains(&s) {
                slot.push(s);
            }
        }
    }

    pub fn row_sources(&self, row: u32) -> &[usize] {
        self.row_sources
            .get(row as usize - 1)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_named_cell(&mut self, id: impl Into<String>, cell: CellRef) {
        self.named_cells.insert(id.into().to_ascii_lowercase(), cell);
    }

    pub fn named_cell(&self, id: &str) -> Option<CellRef> {
        self.named_cells.get(&id.to_ascii_lowercase()).copied()
    }

    fn rows_matching(&self, roles: &[String]) -> Option<(u32, u32)> {
        span_matching(&self.row_roles, roles)
    }

    fn cols_matching(&self, roles: &[String]) -> Option<(u32, u32)> {
        span_matching(&self.col_roles, roles)
    }

    /// Smallest range covering every row/col tagged with any of the given
    /// (unqualified) roles. `None` when a role axis matches nothing.
    pub fn range_for(
        &self,
        row_roles: &[&str],
        col_roles: &[&str],
        max_rows: Option<u32>,
        max_cols: Option<u32>,
    ) -> Option<RangeRef> {
        debug_assert!(max_rows.is_none_or(|m| m >= 1));
        debug_assert!(max_cols.is_none_or(|m| m >= 1));
        let row_roles = self.qualify_all(row_roles);
        let col_roles = self.qualify_all(col_roles);
        let (top, mut bottom) = self.rows_matching(&row_roles)?;
        let (left, mut right) = self.cols_matching(&col_roles)?;
        if let Some(m) = max_rows {
            bottom = bottom.min(top + m - 1);
        }
        if let Some(m) = max_cols {
            right = right.min(left + m - 1);
        }
        Some(RangeRef::new(
            CellRef::new(top, left),
            CellRef::new(bottom, right),
        ))
    }

    /// Every cell whose row and column both carry one of the given roles,
    /// in row-major order.
    pub fn cells_for(&self, row_roles: &[&str], col_roles: &[&str]) -> Vec<CellRef> {
        let row_roles = self.qualify_all(row_roles);
        let col_roles = self.qualify_all(col_roles);
        let rows: Vec<u32> = matching_indices(&self.row_roles, &row_roles);
        let cols: Vec<u32> = matching_indices(&self.col_roles, &col_roles);
        let mut out = Vec::with_capacity(rows.len() * cols.len());
        for &r in &rows {
            for &c in &cols {
                out.push(CellRef::new(r, c));
            }
        }
        out
    }

    /// Column span for a set of roles, independent of any row tagging.
    pub fn col_span(&self, col_roles: &[&str]) -> Option<(u32, u32)> {
        self.cols_matching(&self.qualify_all(col_roles))
    }

    fn qualify_all(&self, roles: &[&str]) -> Vec<String> {
        roles
            .iter()
            .map(|r| qualified_role(&self.name, r))
            .collect()
    }
}

fn ensure<T: Default>(table: &mut Vec<T>, idx: usize) -> &mut T {
    while table.len() <= idx {
        table.push(T::default());
    }
    &mut table[idx]
}

fn matching_indices(table: &[Vec<String>], roles: &[String]) -> Vec<u32> {
    table
        .iter()
        .enumerate()
        .filter(|(_, names)| names.iter().any(|n| roles.contains(n)))
        .map(|(i, _)| i as u32 + 1)
        .collect()
}

fn span_matching(table: &[Vec<String>], roles: &[String]) -> Option<(u32, u32)> {
    let matched = matching_indices(table, roles);
    Some((*matched.first()?, *matched.last()?))
}

/// All live logical sheets, looked up by name.
#[derive(Clone, Debug, Default)]
pub struct RegionIndex {
    infos: Vec<LogicalSheetInfo>,
}

impl RegionIndex {
    pub fn new() -> Self {
        RegionIndex::default()
    }

    pub fn insert(&mut self, info: LogicalSheetInfo) {
        debug_assert!(self.get(&info.name).is_none());
        self.infos.push(info);
    }

    pub fn get(&self, name: &str) -> Option<&LogicalSheetInfo> {
        self.infos.iter().find(|i| i.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LogicalSheetInfo> {
        self.infos.iter_mut().find(|i| i.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogicalSheetInfo> {
        self.infos.iter()
    }

    pub fn retain(&mut self, f: impl FnMut(&LogicalSheetInfo) -> bool) {
        self.infos.retain(f);
    }

    /// Logical sheets sharing a physical sheet adopt the element-wise max of
    /// their extents, so later appends land below every region on the sheet.
    pub fn consolidate_extents(&mut self) {
        let mut by_sheet: FxHashMap<SheetId, (u32, u32)> = FxHashMap::default();
        for info in &self.infos {
            let entry = by_sheet.entry(info.sheet).or_insert((0, 0));
            entry.0 = entry.0.max(info.extents.0);
            entry.1 = entry.1.max(info.extents.1);
        }
        for info in &mut self.infos {
            if let Some(&max) = by_sheet.get(&info.sheet) {
                info.extents = max;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> LogicalSheetInfo {
        let mut i = LogicalSheetInfo::new("Main", 0, (1, 1));
        for row in 2..=5 {
            i.add_row_role(row, "data");
        }
        i.add_row_role(1, "header");
        i.add_col_role(1, "label");
        i.add_col_role(2, "ct");
        i.add_col_role(3, "ct");
        i
    }

    #[test]
    fn range_spans_matching_roles() {
        let i = info();
        let r = i.range_for(&["data"], &["ct"], None, None).unwrap();
        assert_eq!(r.a1(), "B2:C5");
        let r = i.range_for(&["header", "data"], &["label"], None, None).unwrap();
        assert_eq!(r.a1(), "A1:A5");
        assert!(i.range_for(&["absent"], &["ct"], None, None).is_none());
    }

    #[test]
    fn range_clips_to_max() {
        let i = info();
        let r = i.range_for(&["data"], &["ct"], Some(2), Some(1)).unwrap();
        assert_eq!(r.a1(), "B2:B3");
    }

    #[test]
    fn cells_need_both_axes_to_match() {
        let i = info();
        let cells = i.cells_for(&["header"], &["ct"]);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].a1(), "B1");
        assert_eq!(cells[1].a1(), "C1");
    }

    #[test]
    fn roles_are_sheet_qualified() {
        let mut a = LogicalSheetInfo::new("A", 0, (1, 1));
        let mut b = LogicalSheetInfo::new("B", 0, (6, 1));
        a.add_row_role(1, "data");
        b.add_row_role(6, "data");
        // Region A must not see region B's rows.
        let r = a.range_for(&["data"], &["x"], None, None);
        assert!(r.is_none()); // no cols tagged, but rows matched only A's
        a.add_col_role(1, "x");
        let r = a.range_for(&["data"], &["x"], None, None).unwrap();
        assert_eq!(r.a1(), "A1");
    }

    #[test]
    fn consolidation_takes_elementwise_max() {
        let mut index = RegionIndex::new();
        let mut a = LogicalSheetInfo::new("A", 0, (1, 1));
        a.extents = (10, 5);
        let mut b = LogicalSheetInfo::new("B", 0, (1, 1));
        b.extents = (7, 12);
        let mut c = LogicalSheetInfo::new("C", 1, (1, 1));
        c.extents = (3, 3);
        index.insert(a);
        index.insert(b);
        index.insert(c);
        index.consolidate_extents();
        assert_eq!(index.get("A").unwrap().extents, (10, 12));
        assert_eq!(index.get("B").unwrap().extents, (10, 12));
        assert_eq!(index.get("C").unwrap().extents, (3, 3));
    }

    #[test]
    fn named_cells_are_case_insensitive() {
        let mut i = info();
        i.set_named_cell("Slope", CellRef::new(9, 2));
        assert_eq!(i.named_cell("slope").unwrap().a1(), "B9");
        assert!(i.named_cell("intercept").is_none());
    }
}
