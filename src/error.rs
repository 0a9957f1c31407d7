use thiserror::Error;

/// Failures the data pipeline can surface to a caller.
///
/// Missing optional columns, empty selections and invalid geometries are not
/// errors: loaders recover from them locally and the filter/join/aggregate
/// stages represent them as empty results.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The source could not be reached or its content could not be parsed.
    #[error("data unavailable from {locator}: {reason}")]
    DataUnavailable { locator: String, reason: String },

    /// The source declares a coordinate reference we cannot reproject from.
    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    /// A user-supplied coordinate is outside the geographic range.
    #[error("coordinate out of range: lat={latitude}, lon={longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// Writing an exported artifact failed.
    #[error("export failed: {0}")]
    Export(String),
}

impl PipelineError {
    pub fn unavailable(locator: &str, reason: impl ToString) -> Self {
        PipelineError::DataUnavailable {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Export(e.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
