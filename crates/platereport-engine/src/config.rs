//! Populator configuration.
//!
//! Plain serde types; loading them from files or CLI flags is the caller's
//! business.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where calibration regions are expanded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPlacement {
    /// Below the main region, on the main sheet.
    MainSheet,
    /// One shared sheet holding every curve, stacked.
    #[default]
    SharedSheet,
    /// One sheet per curve, named by curve id.
    PerCurveSheet,
    /// Expanded on a shared sheet that is dropped before save; curve values
    /// stay available for literal embedding.
    Hidden,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulatorConfig {
    pub main_sheet_name: String,
    /// Template region keys.
    pub main_region: String,
    pub calibration_region: String,
    /// Physical sheet title for shared/hidden calibration placement.
    pub shared_calibration_sheet: String,

    /// First (row, col) the main region writes to.
    pub main_origin: (u32, u32),
    /// First (row, col) for calibration regions on their sheet.
    pub cal_origin: (u32, u32),
    pub rows_between_main_groups: u32,
    pub rows_between_cal_groups: u32,

    /// Expand banner and header rows only for the first group of a file.
    pub banners_and_headers_once: bool,
    pub calibration_placement: CalibrationPlacement,
    /// `__GETCALVAL` embeds literal values even when a named cell exists.
    pub prefer_precalculated: bool,

    pub min_curve_points: usize,
    /// Replicates averaged into each curve point and into `qpcr.ctavg`.
    pub slope_replicates: usize,
    pub preferred_slope: Option<f64>,
    pub require_curve_on_same_plate: bool,

    /// Targets listed first in main and calibration ordering.
    pub main_targets: Vec<String>,
    /// Common curve target -> aliases sharing its curve.
    pub common_targets: HashMap<String, Vec<String>>,
}

impl Default for PopulatorConfig {
    fn default() -> Self {
        PopulatorConfig {
            main_sheet_name: "Main".to_string(),
            main_region: "main".to_string(),
            calibration_region: "calibration".to_string(),
            shared_calibration_sheet: "Cal".to_string(),
            main_origin: (1, 1),
            cal_origin: (1, 1),
            rows_between_main_groups: 2,
            rows_between_cal_groups: 1,
            banners_and_headers_once: false,
            calibration_placement: CalibrationPlacement::default(),
            prefer_precalculated: false,
            min_curve_points: 3,
            slope_replicates: 3,
            preferred_slope: None,
            require_curve_on_same_plate: false,
            main_targets: Vec::new(),
            common_targets: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PopulatorConfig = serde_json::from_str(
            r#"{
                "calibration_placement": "per_curve_sheet",
                "preferred_slope": -3.3,
                "main_targets": ["N1", "N2"]
            }"#,
        )
        .unwrap();
        assert_eq!(
            cfg.calibration_placement,
            CalibrationPlacement::PerCurveSheet
        );
        assert_eq!(cfg.preferred_slope, Some(-3.3));
        assert_eq!(cfg.main_targets, vec!["N1", "N2"]);
        assert_eq!(cfg.min_curve_points, 3);
        assert_eq!(cfg.main_sheet_name, "Main");
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = PopulatorConfig {
            require_curve_on_same_plate: true,
            ..Default::default()
        };
        let text = serde_json::to_string(&cfg).unwrap();
        let back: PopulatorConfig = serde_json::from_str(&text).unwrap();
        assert!(back.require_curve_on_same_plate);
        assert_eq!(back.calibration_placement, cfg.calibration_placement);
    }
}
