use platereport_template::TagParseError;
use thiserror::Error;

/// Engine-level failure taxonomy.
///
/// `TemplateParse` is structural and aborts a run. `CustomFunction` is
/// absorbed per cell: the populate driver writes the message into the cell
/// and keeps going. `CalibrationFit` marks one curve as skipped.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("template parse error: {0}")]
    TemplateParse(#[from] TagParseError),

    #[error("{name}: {message}")]
    CustomFunction { name: String, message: String },

    #[error("calibration fit for {curve_id} failed: {reason}")]
    CalibrationFit { curve_id: String, reason: String },

    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("template region not found: {0}")]
    MissingRegion(String),

    #[error("xlsx: {0}")]
    Xlsx(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::CustomFunction {
            name: name.into(),
            message: message.into(),
        }
    }
}
