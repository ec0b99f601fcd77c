//! The populate driver.
//!
//! One call builds one output document: curve ids are assigned, rows are
//! split into analysis-date groups (each pulling in the standard rows
//! backing any curve it references), and per group the main region, the
//! calibration regions, and the two deferred passes run in order. Grouping
//! rows into destination documents is the caller's concern.

use crate::book::OutputBook;
use crate::config::{CalibrationPlacement, PopulatorConfig};
use crate::curve::{CalibrationCurve, assign_standard_curve_ids, collect_points, common_target, curve_id};
use crate::defer::{DeferredPass, DeferredQueue};
use crate::error::EngineError;
use crate::expand::Expander;
use crate::funcs::{ExpansionContext, execute_deferred};
use crate::region::{LogicalSheetInfo, RegionIndex};
use crate::template::{TemplateBook, TemplateRegion};
use chrono::NaiveDate;
use platereport_common::{MeasurementRow, MeasurementType, SheetId};
use platereport_template::RowContext;
use tracing::{debug, debug_span, warn};

#[derive(Clone, Debug, Default)]
pub struct SkippedCurve {
    pub id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct PopulateSummary {
    pub groups: usize,
    pub data_rows: usize,
    pub curves_fitted: usize,
    pub dropped_unknown_rows: usize,
    pub skipped_curves: Vec<SkippedCurve>,
}

/// The finished document plus the working recordset cell provenance points
/// into (curve ids assigned, dropped rows removed).
#[derive(Clone, Debug)]
pub struct PopulateOutput {
    pub book: OutputBook,
    pub summary: PopulateSummary,
    pub rows: Vec<MeasurementRow>,
}

pub fn populate(
    template: &TemplateBook,
    records: &[MeasurementRow],
    config: &PopulatorConfig,
) -> Result<PopulateOutput, EngineError> {
    Populator::new(template, records, config)?.run()
}

struct Populator<'a> {
    template: &'a TemplateBook,
    config: &'a PopulatorConfig,
    rows: Vec<MeasurementRow>,
    book: OutputBook,
    index: RegionIndex,
    queue: DeferredQueue,
    summary: PopulateSummary,
    main_sheet: SheetId,
}

impl<'a> Populator<'a> {
    fn new(
        template: &'a TemplateBook,
        records: &'a [MeasurementRow],
        config: &'a PopulatorConfig,
    ) -> Result<Self, EngineError> {
        template
            .region(&config.main_region)
            .ok_or_else(|| EngineError::MissingRegion(config.main_region.clone()))?;

        let mut rows = records.to_vec();
        let assignment = assign_standard_curve_ids(
            &mut rows,
            config.require_curve_on_same_plate,
            &config.common_targets,
        );
        let mut dropped = 0;
        if config.require_curve_on_same_plate && !assignment.unmatched_unknowns.is_empty() {
            let mut keep = vec![true; rows.len()];
            for &i in &assignment.unmatched_unknowns {
                keep[i] = false;
            }
            let mut it = keep.iter();
            rows.retain(|_| *it.next().unwrap_or(&true));
            dropped = assignment.unmatched_unknowns.len();
            warn!(count = dropped, "dropped unknown rows without a same-plate curve");
        }

        let mut book = OutputBook::new();
        let main_sheet = book.add_sheet(&config.main_sheet_name);
        let mut index = RegionIndex::new();
        let mut main_info =
            LogicalSheetInfo::new(&config.main_sheet_name, main_sheet, config.main_origin);
        main_info.extents.1 = config.main_origin.1;
        index.insert(main_info);

        Ok(Populator {
            template,
            config,
            rows,
            book,
            index,
            queue: DeferredQueue::new(),
            summary: PopulateSummary {
                dropped_unknown_rows: dropped,
                ..Default::default()
            },
            main_sheet,
        })
    }

    fn run(mut self) -> Result<PopulateOutput, EngineError> {
        let main_region = self
            .template
            .region(&self.config.main_region)
            .ok_or_else(|| EngineError::MissingRegion(self.config.main_region.clone()))?;
        let main_name = self.config.main_sheet_name.clone();
        self.expander().copy_widths(main_region, &main_name);
        if let Some(info) = self.index.get_mut(&main_name) {
            let first_col = info.origin.1;
            for (i, col_roles) in main_region.col_roles.iter().enumerate() {
                for role in col_roles {
                    info.add_col_role(first_col + i as u32, role);
                }
            }
        }

        for (gi, group) in self.date_groups().into_iter().enumerate() {
            let span = debug_span!("group", index = gi, date = ?group.date);
            let _entered = span.enter();
            self.summary.groups += 1;

            self.create_main(main_region, &group, gi)?;
            self.create_calibration(&group)?;

            for call in self.queue.take_pass(DeferredPass::Inner) {
                let mut ectx = ExpansionContext {
                    book: &mut self.book,
                    index: &mut self.index,
                    rows: &self.rows,
                    config: self.config,
                };
                execute_deferred(&call, &mut ectx);
            }
            for call in self.queue.take_pass(DeferredPass::Outer) {
                let mut ectx = ExpansionContext {
                    book: &mut self.book,
                    index: &mut self.index,
                    rows: &self.rows,
                    config: self.config,
                };
                execute_deferred(&call, &mut ectx);
            }

            self.index.consolidate_extents();

            // Calibration regions live for one group only.
            if self.config.calibration_placement == CalibrationPlacement::Hidden {
                let main_sheet = self.main_sheet;
                let cal_sheets: Vec<SheetId> = self
                    .index
                    .iter()
                    .filter(|i| i.name != main_name && i.sheet != main_sheet)
                    .map(|i| i.sheet)
                    .collect();
                for id in cal_sheets {
                    if let Some(sheet) = self.book.sheet_mut(id) {
                        sheet.discarded = true;
                    }
                }
            }
            self.index.retain(|i| i.name == main_name);

            if let Some(info) = self.index.get_mut(&main_name) {
                info.extents.0 += self.config.rows_between_main_groups;
            }
        }

        Ok(PopulateOutput {
            book: self.book,
            summary: self.summary,
            rows: self.rows,
        })
    }

    fn expander(&mut self) -> Expander<'_> {
        Expander {
            book: &mut self.book,
            index: &mut self.index,
            rows: &self.rows,
            config: self.config,
            queue: &mut self.queue,
        }
    }

    /// Split rows into analysis-date groups. Each group also pulls in the
    /// standard rows (from any date) backing a curve its rows reference.
    fn date_groups(&self) -> Vec<DateGroup> {
        let mut dates: Vec<Option<NaiveDate>> = Vec::new();
        for row in &self.rows {
            if !dates.contains(&row.analysis_date) {
                dates.push(row.analysis_date);
            }
        }
        dates.sort();

        dates
            .into_iter()
            .map(|date| {
                let mut members: Vec<usize> = self
                    .rows
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.analysis_date == date)
                    .map(|(i, _)| i)
                    .collect();
                let referenced: Vec<&str> = members
                    .iter()
                    .filter_map(|&i| self.rows[i].standard_curve_id.as_deref())
                    .collect();
                for (i, row) in self.rows.iter().enumerate() {
                    if row.measurement_type == MeasurementType::Standard
                        && !members.contains(&i)
                        && row
                            .standard_curve_id
                            .as_deref()
                            .is_some_and(|id| referenced.contains(&id))
                    {
                        members.push(i);
                    }
                }
                DateGroup { date, members }
            })
            .collect()
    }

    fn create_main(
        &mut self,
        region: &TemplateRegion,
        group: &DateGroup,
        gi: usize,
    ) -> Result<(), EngineError> {
        let sheet = self.config.main_sheet_name.clone();
        let group_ctx = self.group_ctx(group);
        let once_done = self.config.banners_and_headers_once && gi > 0;

        if !once_done {
            self.expander().copy_rows(region, "banner", &sheet, &group_ctx, &[])?;
        }

        for target in self.ordered_targets(group) {
            if !once_done {
                let mut target_ctx = group_ctx.clone();
                target_ctx.insert("target.name", &target);
                self.expander()
                    .copy_rows(region, "header", &sheet, &target_ctx, &[])?;
            }
            let mut item = 0u32;
            for sample in self.samples_for(group, &target) {
                item += 1;
                let member_rows: Vec<usize> = group
                    .members
                    .iter()
                    .copied()
                    .filter(|&i| {
                        let r = &self.rows[i];
                        r.measurement_type == MeasurementType::Unknown
                            && r.target == target
                            && r.sample_id == sample
                    })
                    .collect();
                let mut ctx = group_ctx.clone();
                ctx.insert("target.name", &target);
                self.sample_ctx(&mut ctx, &member_rows, item);
                let written =
                    self.expander()
                        .copy_rows(region, "data", &sheet, &ctx, &member_rows)?;
                self.summary.data_rows += written as usize;
            }
        }

        self.expander()
            .copy_rows(region, "footer", &sheet, &group_ctx, &[])?;
        Ok(())
    }

    fn create_calibration(&mut self, group: &DateGroup) -> Result<(), EngineError> {
        let Some(region) = self.template.region(&self.config.calibration_region) else {
            debug!("no calibration region in template");
            return Ok(());
        };

        // Standards grouped by (common target, plate), main targets first.
        let mut keys: Vec<(String, String)> = Vec::new();
        for &i in &group.members {
            let row = &self.rows[i];
            if row.measurement_type != MeasurementType::Standard {
                continue;
            }
            let key = (
                common_target(&self.config.common_targets, &row.target),
                row.plate_id.clone(),
            );
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys.sort_by_key(|(target, plate)| {
            let rank = self
                .config
                .main_targets
                .iter()
                .position(|t| t == target)
                .unwrap_or(usize::MAX);
            (rank, target.clone(), plate.clone())
        });

        for (target, plate) in keys {
            self.create_one_curve(region, group, &target, &plate)?;
        }
        Ok(())
    }

    fn create_one_curve(
        &mut self,
        region: &TemplateRegion,
        group: &DateGroup,
        target: &str,
        plate: &str,
    ) -> Result<(), EngineError> {
        let id = curve_id(target, plate);
        let std_rows: Vec<(usize, &MeasurementRow)> = group
            .members
            .iter()
            .copied()
            .filter(|&i| {
                let r = &self.rows[i];
                r.measurement_type == MeasurementType::Standard
                    && r.plate_id == plate
                    && common_target(&self.config.common_targets, &r.target) == target
            })
            .map(|i| (i, &self.rows[i]))
            .collect();
        let points = collect_points(&std_rows, self.config.slope_replicates);

        let (sheet_id, origin) = self.curve_placement(&id);
        let mut info = LogicalSheetInfo::new(&id, sheet_id, origin);
        info.plate_id = plate.to_string();
        info.target_name = target.to_string();
        for (i, col_roles) in region.col_roles.iter().enumerate() {
            for role in col_roles {
                info.add_col_role(origin.1 + i as u32, role);
            }
        }

        let curve = match CalibrationCurve::build(
            target,
            plate,
            &points,
            self.config.min_curve_points,
            self.config.preferred_slope,
        ) {
            Ok(curve) => {
                self.summary.curves_fitted += 1;
                Some(curve)
            }
            Err(e) => {
                warn!(curve = %id, error = %e, "calibration curve skipped");
                self.summary.skipped_curves.push(SkippedCurve {
                    id: id.clone(),
                    reason: e.to_string(),
                });
                None
            }
        };
        info.curve = curve.clone();
        self.index.insert(info);
        self.expander().copy_widths(region, &id);

        let mut ctx = self.group_ctx(group);
        ctx.insert("cal.id", &id);
        ctx.insert("cal.target", target);
        ctx.insert("cal.plate", plate);
        ctx.insert("sample.curveid", &id);
        if let Some(curve) = &curve {
            ctx.insert("cal.slope", format!("{}", curve.slope));
            ctx.insert("cal.intercept", format!("{}", curve.intercept));
            ctx.insert("cal.rsq", format!("{}", curve.r_squared));
            ctx.insert("cal.eff", format!("{}", curve.efficiency));
            ctx.insert("cal.num_points", format!("{}", curve.points_used));
            ctx.insert("cal.max_points", format!("{}", curve.points_available));
        }

        self.expander().copy_rows(region, "banner", &id, &ctx, &[])?;
        self.expander().copy_rows(region, "header", &id, &ctx, &[])?;

        for (n, point) in points.iter().enumerate() {
            let mut row_ctx = ctx.clone();
            row_ctx.insert_with_rows("sample.id", &point.sample_id, &point.sources);
            row_ctx.insert_with_rows("cal.sq", format!("{}", point.quantity), &point.sources);
            row_ctx.insert_with_rows(
                "cal.logsq",
                format!("{}", point.log_quantity),
                &point.sources,
            );
            row_ctx.insert_with_rows(
                "qpcr.ctavg",
                format!("{}", point.mean_ct),
                &point.sources,
            );
            for (k, &src) in point.sources.iter().enumerate() {
                row_ctx.insert_with_rows(
                    format!("qpcr.ct.{k}"),
                    self.rows[src].ct_display(),
                    &[src],
                );
            }
            row_ctx.insert("item.number", format!("{}", n + 1));
            row_ctx.set_replicate(format!("{}", n + 1));
            self.expander()
                .copy_rows(region, "data", &id, &row_ctx, &point.sources)?;
        }

        self.expander().copy_rows(region, "footer", &id, &ctx, &[])?;
        Ok(())
    }

    /// Physical sheet and origin for one curve region, per placement.
    /// Appends below whatever the physical sheet already holds.
    fn curve_placement(&mut self, id: &str) -> (SheetId, (u32, u32)) {
        let placement = self.config.calibration_placement;
        let (sheet_id, base) = match placement {
            CalibrationPlacement::MainSheet => (self.main_sheet, self.config.cal_origin),
            CalibrationPlacement::SharedSheet | CalibrationPlacement::Hidden => (
                self.book.get_or_add(&self.config.shared_calibration_sheet),
                self.config.cal_origin,
            ),
            CalibrationPlacement::PerCurveSheet => {
                (self.book.get_or_add(id), self.config.cal_origin)
            }
        };
        let max_row = self.book.sheet(sheet_id).map(|s| s.max_row()).unwrap_or(0);
        let row = if max_row == 0 {
            base.0
        } else {
            base.0.max(max_row + self.config.rows_between_cal_groups + 1)
        };
        (sheet_id, (row, base.1))
    }

    fn group_ctx(&self, group: &DateGroup) -> RowContext {
        let mut ctx = RowContext::new();
        ctx.insert(
            "group.date",
            group
                .date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        );
        ctx
    }

    /// Context entries for one sample's replicate rows.
    fn sample_ctx(&self, ctx: &mut RowContext, member_rows: &[usize], item: u32) {
        let Some(&first) = member_rows.first() else {
            return;
        };
        let row = &self.rows[first];
        ctx.insert_with_rows("sample.id", &row.sample_id, member_rows);
        ctx.insert_with_rows("sample.plateid", &row.plate_id, member_rows);
        ctx.insert_with_rows(
            "sample.date",
            row.analysis_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            member_rows,
        );
        ctx.insert_with_rows(
            "sample.curveid",
            row.standard_curve_id.clone().unwrap_or_default(),
            member_rows,
        );
        for (n, &i) in member_rows.iter().enumerate() {
            ctx.insert_with_rows(format!("qpcr.ct.{n}"), self.rows[i].ct_display(), &[i]);
        }
        let cts: Vec<f64> = member_rows
            .iter()
            .filter_map(|&i| self.rows[i].numeric_ct())
            .take(self.config.slope_replicates)
            .collect();
        let avg = if cts.is_empty() {
            String::new()
        } else {
            format!("{}", cts.iter().sum::<f64>() / cts.len() as f64)
        };
        ctx.insert_with_rows("qpcr.ctavg", avg, member_rows);
        ctx.insert("item.number", format!("{item}"));
        ctx.set_replicate(format!("{item}"));
    }

    /// Targets shown in the main region: configured order first, then any
    /// remaining targets alphabetically.
    fn ordered_targets(&self, group: &DateGroup) -> Vec<String> {
        let mut present: Vec<&str> = Vec::new();
        for &i in &group.members {
            let r = &self.rows[i];
            if r.measurement_type == MeasurementType::Unknown
                && !present.contains(&r.target.as_str())
            {
                present.push(&r.target);
            }
        }
        let mut ordered: Vec<String> = self
            .config
            .main_targets
            .iter()
            .filter(|t| present.contains(&t.as_str()))
            .cloned()
            .collect();
        let mut extras: Vec<String> = present
            .iter()
            .filter(|t| !self.config.main_targets.iter().any(|m| m == *t))
            .map(|t| t.to_string())
            .collect();
        extras.sort();
        ordered.extend(extras);
        ordered
    }

    /// Unknown-sample ids for a target, in order of first appearance.
    fn samples_for(&self, group: &DateGroup, target: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for &i in &group.members {
            let r = &self.rows[i];
            if r.measurement_type == MeasurementType::Unknown
                && r.target == target
                && !out.contains(&r.sample_id)
            {
                out.push(r.sample_id.clone());
            }
        }
        out
    }
}

struct DateGroup {
    date: Option<NaiveDate>,
    members: Vec<usize>,
}
