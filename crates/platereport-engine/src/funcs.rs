//! Custom function engine.
//!
//! A fixed registry maps `__NAME` to a handler and a bind priority. Priority
//! zero runs while the cell is first written; non-zero calls are queued (see
//! `defer`) and re-run through the same scan once the group's regions exist.
//!
//! Argument conventions: role arguments may hold several whitespace-separated
//! roles; roles are qualified against the invoking logical sheet; a literal
//! `fixed` argument anchors returned addresses on both axes.

use crate::book::OutputBook;
use crate::config::{CalibrationPlacement, PopulatorConfig};
use crate::curve::CalibrationCurve;
use crate::defer::{DeferredCall, DeferredQueue};
use crate::error::EngineError;
use crate::region::{LogicalSheetInfo, RegionIndex};
use once_cell::sync::Lazy;
use platereport_common::{CellRef, CellValue, MeasurementRow, RangeRef};
use platereport_template::{RowContext, find_call};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Mutable engine state a handler may touch.
pub struct ExpansionContext<'a> {
    pub book: &'a mut OutputBook,
    pub index: &'a mut RegionIndex,
    pub rows: &'a [MeasurementRow],
    pub config: &'a PopulatorConfig,
}

/// One call about to execute.
pub struct Invocation<'a> {
    pub args: &'a [String],
    /// Logical sheet the call sits on.
    pub sheet: &'a str,
    /// Output coordinates of the cell being written.
    pub target: CellRef,
    pub ctx: &'a RowContext,
}

pub type Handler = fn(&mut ExpansionContext<'_>, &Invocation<'_>) -> Result<String, EngineError>;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    /// 0 immediate; negative deferred inner; positive deferred outer.
    pub bind: i32,
    pub handler: Handler,
}

static REGISTRY: Lazy<FxHashMap<&'static str, FunctionSpec>> = Lazy::new(|| {
    let specs: &[FunctionSpec] = &[
        FunctionSpec { name: "__GETRANGE", bind: -10, handler: fn_getrange },
        FunctionSpec { name: "__GETCELL", bind: -10, handler: fn_getcell },
        FunctionSpec { name: "__GETCALVAL", bind: -2, handler: fn_getcalval },
        FunctionSpec { name: "__GETDATA", bind: -1, handler: fn_getdata },
        FunctionSpec { name: "__QUOTIFY", bind: -20, handler: fn_quotify },
        FunctionSpec { name: "__UNQUOTIFY", bind: -20, handler: fn_unquotify },
        FunctionSpec { name: "__UPPER", bind: -21, handler: fn_upper },
        FunctionSpec { name: "__LOWER", bind: -21, handler: fn_lower },
        FunctionSpec { name: "__MAKEHEADER", bind: -21, handler: fn_makeheader },
        FunctionSpec { name: "__SELECT", bind: -21, handler: fn_select },
        FunctionSpec { name: "__AVERAGE", bind: 0, handler: fn_average },
        FunctionSpec { name: "__SETCELL", bind: 1, handler: fn_setcell },
        FunctionSpec { name: "__ADDROWID", bind: 1, handler: fn_addrowid },
        FunctionSpec { name: "__MOVINGAVERAGE", bind: 1, handler: fn_movingaverage },
        FunctionSpec { name: "__MERGETO", bind: 20, handler: fn_mergeto },
    ];
    specs.iter().map(|s| (s.name, *s)).collect()
});

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    REGISTRY.get(name)
}

/// Scan `text` for calls and process them.
///
/// With a queue, calls with non-zero bind are recorded (context snapshot
/// included) and left in place; without one every known call executes now.
/// A handler error replaces the whole cell text so the failure stays visible
/// in the report. Unknown `__` names are left as literal text.
pub fn run_calls(
    mut text: String,
    ectx: &mut ExpansionContext<'_>,
    sheet: &str,
    target: CellRef,
    ctx: &RowContext,
    mut queue: Option<&mut DeferredQueue>,
    filter: Option<&str>,
) -> String {
    let mut from = 0;
    while let Some(m) = find_call(&text, from, filter) {
        let Some(spec) = lookup(&m.name) else {
            debug!(name = %m.name, "unregistered function left as literal text");
            from = m.name_start + 1;
            continue;
        };
        if spec.bind != 0
            && let Some(q) = queue.as_deref_mut()
        {
            // Named cells register at layout time; the queued run only
            // strips the call text. Inner-pass address lookups see them.
            if m.name == "__SETCELL"
                && let Some(id) = m.args.first()
                && let Some(info) = ectx.index.get_mut(sheet)
            {
                info.set_named_cell(id.clone(), target);
            }
            q.push(DeferredCall {
                priority: spec.bind,
                name: m.name.clone(),
                args: m.args.clone(),
                sheet: sheet.to_string(),
                target,
                ctx: ctx.clone(),
            });
            from = m.name_start + 1;
            continue;
        }
        let inv = Invocation {
            args: &m.args,
            sheet,
            target,
            ctx,
        };
        match (spec.handler)(ectx, &inv) {
            Ok(replacement) => {
                from = m.span.start;
                text.replace_range(m.span, &replacement);
            }
            Err(e) => {
                warn!(name = %m.name, error = %e, "custom function failed");
                return e.to_string();
            }
        }
    }
    text
}

/// Execute one queued call against the current cell text, then re-cast the
/// cell. A cell that no longer contains the call is a no-op.
pub fn execute_deferred(call: &DeferredCall, ectx: &mut ExpansionContext<'_>) {
    let Some(info) = ectx.index.get(&call.sheet) else {
        warn!(sheet = %call.sheet, "deferred call against a dropped region");
        return;
    };
    let sheet_id = info.sheet;
    let Some(sheet) = ectx.book.sheet(sheet_id) else {
        return;
    };
    let text = sheet.text(call.target.row, call.target.col);
    if text.is_empty() {
        return;
    }
    let resolved = run_calls(
        text,
        ectx,
        &call.sheet,
        call.target,
        &call.ctx,
        None,
        Some(&call.name),
    );
    if let Some(sheet) = ectx.book.sheet_mut(sheet_id) {
        let cell = sheet.cell_mut(call.target.row, call.target.col);
        cell.value = CellValue::cast_text(&resolved, cell.style.number_format.as_deref());
    }
}

fn info<'a>(ectx: &'a ExpansionContext<'_>, name: &str) -> Result<&'a LogicalSheetInfo, EngineError> {
    ectx.index
        .get(name)
        .ok_or_else(|| EngineError::UnknownSheet(name.to_string()))
}

fn physical_title(ectx: &ExpansionContext<'_>, info: &LogicalSheetInfo) -> String {
    ectx.book
        .title(info.sheet)
        .unwrap_or(&info.name)
        .to_string()
}

fn roles(arg: &str) -> Vec<&str> {
    arg.split_whitespace().collect()
}

fn arg<'a>(inv: &'a Invocation<'_>, i: usize, name: &str) -> Result<&'a str, EngineError> {
    inv.args
        .get(i)
        .map(|s| s.as_str())
        .ok_or_else(|| EngineError::function(name, format!("missing argument {}", i + 1)))
}

fn is_fixed(inv: &Invocation<'_>, i: usize) -> bool {
    inv.args
        .get(i)
        .is_some_and(|a| a.eq_ignore_ascii_case("fixed") || a.eq_ignore_ascii_case("true"))
}

fn opt_num(inv: &Invocation<'_>, i: usize) -> Option<u32> {
    inv.args.get(i).and_then(|a| a.parse().ok())
}

/// `__GETRANGE(rowRoles, colRoles[, fixed[, maxRows[, maxCols]]])`
fn fn_getrange(ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let info = info(ectx, inv.sheet)?;
    let row_roles = roles(arg(inv, 0, "__GETRANGE")?);
    let col_roles = roles(arg(inv, 1, "__GETRANGE")?);
    let range = info
        .range_for(&row_roles, &col_roles, opt_num(inv, 3), opt_num(inv, 4))
        .ok_or_else(|| {
            EngineError::UnresolvedReference(format!(
                "no cells tagged {row_roles:?}/{col_roles:?} on {}",
                inv.sheet
            ))
        })?;
    let fixed = is_fixed(inv, 2);
    Ok(range
        .anchored(fixed, fixed)
        .qualified(&physical_title(ectx, info)))
}

/// `__GETCELL(rowRole, colRole[, fixed])`
fn fn_getcell(ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let info = info(ectx, inv.sheet)?;
    let row_roles = roles(arg(inv, 0, "__GETCELL")?);
    let col_roles = roles(arg(inv, 1, "__GETCELL")?);
    let cell = info
        .cells_for(&row_roles, &col_roles)
        .into_iter()
        .next()
        .ok_or_else(|| {
            EngineError::UnresolvedReference(format!(
                "no cell tagged {row_roles:?}/{col_roles:?} on {}",
                inv.sheet
            ))
        })?;
    let fixed = is_fixed(inv, 2);
    Ok(cell
        .anchored(fixed, fixed)
        .qualified(&physical_title(ectx, info)))
}

/// `__GETCALVAL(key[, default])`: a curve statistic for the row's assigned
/// curve (falling back to the invoking sheet's own curve). Resolves to a
/// cell address when the curve is laid out visibly and a named cell exists,
/// otherwise to the literal value.
fn fn_getcalval(
    ectx: &mut ExpansionContext<'_>,
    inv: &Invocation<'_>,
) -> Result<String, EngineError> {
    let key = arg(inv, 0, "__GETCALVAL")?.to_string();
    let curve_sheet = match inv.ctx.get("sample.curveid") {
        Some(entry) if !entry.value.is_empty() => entry.value.clone(),
        _ => inv.sheet.to_string(),
    };
    let resolved = ectx.index.get(&curve_sheet).and_then(|info| {
        let hidden = ectx.config.calibration_placement == CalibrationPlacement::Hidden;
        if !hidden && !ectx.config.prefer_precalculated
            && let Some(cell) = info.named_cell(&key)
        {
            return Some(cell.anchored(true, true).qualified(&physical_title(ectx, info)));
        }
        curve_value(info.curve.as_ref(), &key).map(|v| format!("{v}"))
    });
    match resolved {
        Some(text) => Ok(text),
        None => match inv.args.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(EngineError::UnresolvedReference(format!(
                "no calibration value {key:?} for {curve_sheet}"
            ))),
        },
    }
}

fn curve_value(curve: Option<&CalibrationCurve>, key: &str) -> Option<f64> {
    curve.and_then(|c| c.value(key))
}

/// `__GETDATA(path)`: late row-context lookup.
fn fn_getdata(_ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let path = arg(inv, 0, "__GETDATA")?;
    inv.ctx
        .get(path)
        .map(|e| e.value.clone())
        .ok_or_else(|| EngineError::function("__GETDATA", format!("no context value {path:?}")))
}

fn fn_quotify(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    Ok(format!("\"{}\"", arg(inv, 0, "__QUOTIFY")?))
}

fn fn_unquotify(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    Ok(platereport_template::strip_quotes(arg(inv, 0, "__UNQUOTIFY")?).to_string())
}

fn fn_upper(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    Ok(arg(inv, 0, "__UPPER")?.to_uppercase())
}

fn fn_lower(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    Ok(arg(inv, 0, "__LOWER")?.to_lowercase())
}

/// `__MAKEHEADER(text)`: `sample_id`/`sampleId` -> `Sample Id`.
fn fn_makeheader(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let raw = arg(inv, 0, "__MAKEHEADER")?;
    let mut spaced = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c == '_' || c == '.' {
            spaced.push(' ');
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        spaced.push(c);
    }
    let words: Vec<String> = spaced
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    Ok(words.join(" "))
}

/// `__SELECT(n, a, b, ...)`: the n-th (0-based) of the following arguments.
fn fn_select(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let idx: usize = arg(inv, 0, "__SELECT")?
        .trim()
        .parse()
        .map_err(|_| EngineError::function("__SELECT", "index is not an integer"))?;
    inv.args
        .get(idx + 1)
        .cloned()
        .ok_or_else(|| EngineError::function("__SELECT", format!("index {idx} out of range")))
}

/// `__AVERAGE(values...)`: mean of the numeric arguments, empty when none.
fn fn_average(_: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let nums: Vec<f64> = inv
        .args
        .iter()
        .filter_map(|a| a.trim().parse::<f64>().ok())
        .collect();
    if nums.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}", nums.iter().sum::<f64>() / nums.len() as f64))
}

/// `__SETCELL(id)`: register the invoking cell under `id`; expands to
/// nothing. The registration itself already happened when the call was
/// queued; running it here covers the undeferred path.
fn fn_setcell(ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let id = arg(inv, 0, "__SETCELL")?.to_string();
    let target = inv.target;
    ectx.index
        .get_mut(inv.sheet)
        .ok_or_else(|| EngineError::UnknownSheet(inv.sheet.to_string()))?
        .set_named_cell(id, target);
    Ok(String::new())
}

/// `__ADDROWID(role)`: tag the invoking row with an extra role.
fn fn_addrowid(ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let role = arg(inv, 0, "__ADDROWID")?.to_string();
    let row = inv.target.row;
    ectx.index
        .get_mut(inv.sheet)
        .ok_or_else(|| EngineError::UnknownSheet(inv.sheet.to_string()))?
        .add_row_role(row, &role);
    Ok(String::new())
}

/// `__MOVINGAVERAGE(rowRoles, colRole, window)`: an AVERAGE over the last
/// `window` tagged rows of the tagged column, ending at the invoking row.
fn fn_movingaverage(
    ectx: &mut ExpansionContext<'_>,
    inv: &Invocation<'_>,
) -> Result<String, EngineError> {
    let info = info(ectx, inv.sheet)?;
    let row_roles = roles(arg(inv, 0, "__MOVINGAVERAGE")?);
    let col_roles = roles(arg(inv, 1, "__MOVINGAVERAGE")?);
    let window: u32 = arg(inv, 2, "__MOVINGAVERAGE")?
        .trim()
        .parse()
        .map_err(|_| EngineError::function("__MOVINGAVERAGE", "window is not an integer"))?;
    let window = window.max(1);
    let range = info
        .range_for(&row_roles, &col_roles, None, Some(1))
        .ok_or_else(|| {
            EngineError::UnresolvedReference(format!(
                "no cells tagged {row_roles:?}/{col_roles:?} on {}",
                inv.sheet
            ))
        })?;
    let end = inv.target.row.clamp(range.start.row, range.end.row);
    let start = end.saturating_sub(window - 1).max(range.start.row);
    let col = range.start.col;
    Ok(format!(
        "AVERAGE({}:{})",
        CellRef::new(start, col).a1(),
        CellRef::new(end, col).a1()
    ))
}

/// `__MERGETO(colRole)`: merge the invoking cell rightwards through the
/// columns tagged with `colRole`.
fn fn_mergeto(ectx: &mut ExpansionContext<'_>, inv: &Invocation<'_>) -> Result<String, EngineError> {
    let col_roles = roles(arg(inv, 0, "__MERGETO")?);
    let (sheet_id, right) = {
        let info = info(ectx, inv.sheet)?;
        let (_, right) = info.col_span(&col_roles).ok_or_else(|| {
            EngineError::UnresolvedReference(format!(
                "no columns tagged {col_roles:?} on {}",
                inv.sheet
            ))
        })?;
        (info.sheet, right)
    };
    if right > inv.target.col
        && let Some(sheet) = ectx.book.sheet_mut(sheet_id)
    {
        sheet.merge(RangeRef::new(
            inv.target,
            CellRef::new(inv.target.row, right),
        ));
    }
    Ok(String::new())
}
