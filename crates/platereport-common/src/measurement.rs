//! Input recordset model: one row per well/target measurement.

use chrono::NaiveDate;
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Well classification as reported by the instrument export.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum MeasurementType {
    #[default]
    Unknown,
    Standard,
    Ntc,
    Blank,
}

impl MeasurementType {
    /// Lenient parse of the type strings seen in instrument exports.
    pub fn parse(s: &str) -> MeasurementType {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "std" => MeasurementType::Standard,
            "ntc" => MeasurementType::Ntc,
            "blank" | "eb" => MeasurementType::Blank,
            _ => MeasurementType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::Unknown => "Unknown",
            MeasurementType::Standard => "Standard",
            MeasurementType::Ntc => "NTC",
            MeasurementType::Blank => "Blank",
        }
    }
}

impl Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One measurement from the instrument, plus the curve id assigned during
/// population. Treated as immutable input apart from `standard_curve_id`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasurementRow {
    pub target: String,
    pub sample_id: String,
    pub plate_id: String,
    pub well_id: String,
    pub measurement_type: MeasurementType,
    /// Parsed Ct, `None` when the raw reading was non-numeric
    /// (e.g. "Undetermined").
    pub ct: Option<f64>,
    /// Raw Ct text exactly as exported.
    pub raw_ct: String,
    /// Known quantity for standard wells.
    pub standard_quantity: Option<f64>,
    pub analysis_date: Option<NaiveDate>,
    pub standard_curve_id: Option<String>,
    /// Outlier annotation; annotated replicates are excluded from averages
    /// and curve points but still shown in the report.
    pub outlier: Option<String>,
}

impl MeasurementRow {
    pub fn new(
        target: impl Into<String>,
        sample_id: impl Into<String>,
        plate_id: impl Into<String>,
        measurement_type: MeasurementType,
    ) -> Self {
        MeasurementRow {
            target: target.into(),
            sample_id: sample_id.into(),
            plate_id: plate_id.into(),
            measurement_type,
            ..Default::default()
        }
    }

    /// The Ct usable for arithmetic: numeric and not flagged as an outlier.
    pub fn numeric_ct(&self) -> Option<f64> {
        if self.outlier.is_some() { None } else { self.ct }
    }

    /// Display form of the Ct: raw text when the reading was non-numeric.
    pub fn ct_display(&self) -> String {
        match self.ct {
            Some(v) => format!("{v}"),
            None => self.raw_ct.clone(),
        }
    }

    /// Field access by lowercase key, used for provenance matching.
    pub fn field(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "target" => Some(self.target.clone()),
            "sampleid" | "sample_id" => Some(self.sample_id.clone()),
            "plateid" | "plate_id" => Some(self.plate_id.clone()),
            "wellid" | "well_id" => Some(self.well_id.clone()),
            "type" | "measurementtype" => Some(self.measurement_type.to_string()),
            "ct" => Some(self.ct_display()),
            "sq" => self.standard_quantity.map(|q| format!("{q}")),
            "date" => self.analysis_date.map(|d| d.format("%Y-%m-%d").to_string()),
            "curveid" => self.standard_curve_id.clone(),
            "outlier" => self.outlier.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parse_is_lenient() {
        assert_eq!(MeasurementType::parse("Standard"), MeasurementType::Standard);
        assert_eq!(MeasurementType::parse(" std "), MeasurementType::Standard);
        assert_eq!(MeasurementType::parse("NTC"), MeasurementType::Ntc);
        assert_eq!(MeasurementType::parse("eb"), MeasurementType::Blank);
        assert_eq!(MeasurementType::parse("sample"), MeasurementType::Unknown);
    }

    #[test]
    fn outliers_are_excluded_from_numeric_ct() {
        let mut row = MeasurementRow::new("N1", "S1", "P1", MeasurementType::Unknown);
        row.ct = Some(31.5);
        assert_eq!(row.numeric_ct(), Some(31.5));
        row.outlier = Some("grubbs".into());
        assert_eq!(row.numeric_ct(), None);
        assert_eq!(row.ct_display(), "31.5");
    }

    #[test]
    fn non_numeric_ct_keeps_raw_text() {
        let mut row = MeasurementRow::new("N1", "S1", "P1", MeasurementType::Ntc);
        row.raw_ct = "Undetermined".into();
        assert_eq!(row.numeric_ct(), None);
        assert_eq!(row.ct_display(), "Undetermined");
        assert_eq!(row.field("ct").as_deref(), Some("Undetermined"));
    }

    #[test]
    fn field_lookup_is_case_insensitive() {
        let mut row = MeasurementRow::new("N1", "S1", "P1", MeasurementType::Standard);
        row.standard_quantity = Some(1000.0);
        assert_eq!(row.field("SampleID").as_deref(), Some("S1"));
        assert_eq!(row.field("sq").as_deref(), Some("1000"));
        assert_eq!(row.field("nope"), None);
    }
}
