//! Report population engine.
//!
//! Takes a [`TemplateBook`] plus a recordset of [`MeasurementRow`]s and
//! produces a formatted [`OutputBook`], expanding template rows, resolving
//! value tags and custom function calls, fitting calibration curves, and
//! finally persisting through the umya xlsx adapter.

pub mod book;
pub mod config;
pub mod curve;
pub mod defer;
pub mod error;
pub mod expand;
pub mod funcs;
pub mod populate;
pub mod region;
pub mod template;
pub mod xlsx;

pub use book::*;
pub use config::*;
pub use curve::*;
pub use defer::*;
pub use error::*;
pub use expand::*;
pub use funcs::*;
pub use populate::*;
pub use region::*;
pub use template::*;

pub use platereport_common::{
    CellRef, CellValue, MeasurementRow, MeasurementType, RangeRef, SheetId,
};
pub use platereport_template::{RowContext, TagParseError};
