//! Meta crate that re-exports the plate report building blocks. Downstream
//! users can depend on this crate alone; the `template` and `engine` features
//! gate the heavier layers while the core data model is always available.

pub use platereport_common as common;

#[cfg(feature = "template")]
pub use platereport_template as template;

#[cfg(feature = "engine")]
pub use platereport_engine as engine;

pub use platereport_common::{
    CellRef, CellValue, MeasurementRow, MeasurementType, RangeRef, SheetId,
};

#[cfg(feature = "engine")]
pub use platereport_engine::{
    CalibrationCurve, CalibrationPlacement, EngineError, OutputBook, PopulateOutput,
    PopulateSummary, PopulatorConfig, TemplateBook, TemplateRegion, populate,
};

#[cfg(feature = "engine")]
pub use platereport_engine::xlsx::{StyleTable, load_template, save_output, save_with_reopen};
