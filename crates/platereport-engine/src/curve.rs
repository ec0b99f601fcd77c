//! Calibration (standard) curve fitting and curve-id assignment.

use crate::error::EngineError;
use platereport_common::{MeasurementRow, MeasurementType};
use std::collections::HashMap;
use tracing::warn;

/// Curve id format shared by assignment and lookup.
pub fn curve_id(target: &str, plate_id: &str) -> String {
    format!("Cal-{target}-{plate_id}")
}

/// Map a target to its common curve target, e.g. `PMMoV:10` -> `PMMoV`.
/// Targets without a mapping are their own common target.
pub fn common_target(map: &HashMap<String, Vec<String>>, target: &str) -> String {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        if map[key].iter().any(|a| a.eq_ignore_ascii_case(target)) {
            return key.clone();
        }
    }
    target.to_string()
}

/// One calibration point: a standard sample collapsed to a mean Ct.
#[derive(Clone, Debug, PartialEq)]
pub struct CurvePoint {
    pub sample_id: String,
    pub quantity: f64,
    pub log_quantity: f64,
    pub mean_ct: f64,
    /// Recordset rows behind the mean.
    pub sources: Vec<usize>,
}

/// Collapse the standard rows of one (target, plate) group into curve
/// points: one point per sample, ordered by descending quantity, each the
/// mean of the first `replicates` numeric non-outlier Cts.
pub fn collect_points(rows: &[(usize, &MeasurementRow)], replicates: usize) -> Vec<CurvePoint> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_sample: HashMap<&str, Vec<(usize, &MeasurementRow)>> = HashMap::new();
    for &(idx, row) in rows {
        if !by_sample.contains_key(row.sample_id.as_str()) {
            order.push(&row.sample_id);
        }
        by_sample
            .entry(row.sample_id.as_str())
            .or_default()
            .push((idx, row));
    }

    let mut points = Vec::new();
    for sample in order {
        let group = &by_sample[sample];
        let Some(quantity) = group.iter().find_map(|(_, r)| r.standard_quantity) else {
            continue;
        };
        if quantity <= 0.0 {
            continue;
        }
        let mut cts = Vec::new();
        let mut sources = Vec::new();
        for &(idx, row) in group.iter() {
            if cts.len() >= replicates {
                break;
            }
            if let Some(ct) = row.numeric_ct() {
                cts.push(ct);
                sources.push(idx);
            }
        }
        if cts.is_empty() {
            continue;
        }
        points.push(CurvePoint {
            sample_id: sample.to_string(),
            quantity,
            log_quantity: quantity.log10(),
            mean_ct: cts.iter().sum::<f64>() / cts.len() as f64,
            sources,
        });
    }
    points.sort_by(|a, b| {
        b.quantity
            .partial_cmp(&a.quantity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.sample_id.cmp(&b.sample_id))
    });
    points
}

/// Ordinary least squares over (log quantity, mean Ct).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub points_used: usize,
}

fn fit_line(points: &[CurvePoint]) -> Result<LineFit, String> {
    let n = points.len();
    if n < 2 {
        return Err("fewer than two calibration points".to_string());
    }
    let nf = n as f64;
    let mean_x = points.iter().map(|p| p.log_quantity).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p.mean_ct).sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for p in points {
        let dx = p.log_quantity - mean_x;
        let dy = p.mean_ct - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 {
        return Err("all calibration points share one quantity".to_string());
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    if !slope.is_finite() || !intercept.is_finite() {
        return Err("regression produced non-finite coefficients".to_string());
    }
    Ok(LineFit {
        slope,
        intercept,
        r_squared,
        points_used: n,
    })
}

/// Fit using an adaptive point count.
///
/// Without a preferred slope all points are used. With one, every count in
/// `min_points..=len` is fitted over the highest-quantity points and the fit
/// whose slope lies closest to the preference wins; ties go to the first
/// (smallest) count evaluated.
pub fn adaptive_fit(
    points: &[CurvePoint],
    min_points: usize,
    preferred_slope: Option<f64>,
) -> Result<LineFit, String> {
    let min = min_points.max(2);
    let Some(preferred) = preferred_slope else {
        return fit_line(points);
    };
    if points.len() <= min {
        return fit_line(points);
    }
    let mut best: Option<(f64, LineFit)> = None;
    let mut last_err = String::new();
    for n in min..=points.len() {
        match fit_line(&points[..n]) {
            Ok(fit) => {
                let distance = (fit.slope - preferred).abs();
                if best.as_ref().is_none_or(|(d, _)| distance < *d) {
                    best = Some((distance, fit));
                }
            }
            Err(e) => last_err = e,
        }
    }
    best.map(|(_, fit)| fit).ok_or(last_err)
}

/// A fitted standard curve. Immutable once computed.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationCurve {
    pub id: String,
    pub target: String,
    pub plate_id: String,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub efficiency: f64,
    pub points_used: usize,
    pub points_available: usize,
    /// Mean Ct of the highest-quantity point.
    pub min_ct: f64,
    /// Mean Ct of the lowest-quantity point.
    pub max_ct: f64,
    /// Mean Ct of every available point, highest quantity first.
    pub point_mean_cts: Vec<f64>,
}

impl CalibrationCurve {
    pub fn build(
        target: &str,
        plate_id: &str,
        points: &[CurvePoint],
        min_points: usize,
        preferred_slope: Option<f64>,
    ) -> Result<CalibrationCurve, EngineError> {
        let id = curve_id(target, plate_id);
        let fit = adaptive_fit(points, min_points, preferred_slope).map_err(|reason| {
            EngineError::CalibrationFit {
                curve_id: id.clone(),
                reason,
            }
        })?;
        let point_mean_cts: Vec<f64> = points.iter().map(|p| p.mean_ct).collect();
        let min_ct = point_mean_cts.first().copied().unwrap_or(f64::NAN);
        let max_ct = point_mean_cts.last().copied().unwrap_or(f64::NAN);
        Ok(CalibrationCurve {
            id,
            target: target.to_string(),
            plate_id: plate_id.to_string(),
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            efficiency: 10f64.powf(-1.0 / fit.slope) - 1.0,
            points_used: fit.points_used,
            points_available: points.len(),
            min_ct,
            max_ct,
            point_mean_cts,
        })
    }

    /// Keyed numeric access used by `__GETCALVAL` and footers. `avg_std_N`
    /// returns the mean Ct of the N-th point (0-based).
    pub fn value(&self, key: &str) -> Option<f64> {
        let key = key.to_ascii_lowercase();
        if let Some(n) = key.strip_prefix("avg_std_") {
            return n.parse::<usize>().ok().and_then(|i| self.point_mean_cts.get(i)).copied();
        }
        match key.as_str() {
            "slope" => Some(self.slope),
            "intercept" => Some(self.intercept),
            "rsq" | "r_squared" => Some(self.r_squared),
            "eff" | "efficiency" => Some(self.efficiency),
            "num_points" => Some(self.points_used as f64),
            "max_points" => Some(self.points_available as f64),
            "min_ct" => Some(self.min_ct),
            "max_ct" => Some(self.max_ct),
            _ => None,
        }
    }
}

/// Outcome of curve-id assignment over a recordset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CurveAssignment {
    /// Indices of unknown rows left without a curve.
    pub unmatched_unknowns: Vec<usize>,
    /// Rows that adopted a curve from another plate.
    pub borrowed: usize,
}

/// Assign `standard_curve_id` to every row.
///
/// Standards name their own plate's curve. Other rows adopt the same-plate
/// curve for their common target when one exists; otherwise, when cross-plate
/// borrowing is permitted, the plate with the numerically closest analysis
/// date wins (ties to the lexicographically first plate).
pub fn assign_standard_curve_ids(
    rows: &mut [MeasurementRow],
    require_same_plate: bool,
    common_targets: &HashMap<String, Vec<String>>,
) -> CurveAssignment {
    // Plates carrying standards, per common target, with one reference date.
    let mut plates: HashMap<String, Vec<(String, Option<chrono::NaiveDate>)>> = HashMap::new();
    for row in rows.iter() {
        if row.measurement_type != MeasurementType::Standard {
            continue;
        }
        let common = common_target(common_targets, &row.target);
        let entry = plates.entry(common).or_default();
        if !entry.iter().any(|(p, _)| *p == row.plate_id) {
            entry.push((row.plate_id.clone(), row.analysis_date));
        }
    }
    for entry in plates.values_mut() {
        entry.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let mut out = CurveAssignment::default();
    for (idx, row) in rows.iter_mut().enumerate() {
        let common = common_target(common_targets, &row.target);
        if row.measurement_type == MeasurementType::Standard {
            row.standard_curve_id = Some(curve_id(&common, &row.plate_id));
            continue;
        }
        let candidates = plates.get(&common).map(|v| v.as_slice()).unwrap_or(&[]);
        if candidates.iter().any(|(p, _)| *p == row.plate_id) {
            row.standard_curve_id = Some(curve_id(&common, &row.plate_id));
            continue;
        }
        if !require_same_plate && !candidates.is_empty() {
            let mut best: Option<(i64, &str)> = None;
            for (plate, date) in candidates {
                let distance = match (row.analysis_date, date) {
                    (Some(a), Some(b)) => (a - *b).num_days().abs(),
                    _ => i64::MAX,
                };
                if best.is_none_or(|(d, _)| distance < d) {
                    best = Some((distance, plate));
                }
            }
            if let Some((_, plate)) = best {
                row.standard_curve_id = Some(curve_id(&common, plate));
                out.borrowed += 1;
                continue;
            }
        }
        row.standard_curve_id = None;
        if row.measurement_type == MeasurementType::Unknown {
            out.unmatched_unknowns.push(idx);
        }
    }
    if !out.unmatched_unknowns.is_empty() {
        warn!(
            count = out.unmatched_unknowns.len(),
            "unknown rows without a usable standard curve"
        );
    }
    out
}
