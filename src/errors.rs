use std::sync::Arc;

use crate::components::{DataType, PixelBounds};

pub type Result<T> = std::result::Result<T, RasterOpsError>;

/// Errors are [Clone] so that a single failed computation
/// can be handed to every request waiting on it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RasterOpsError {
    #[error("Source band '{band}' not found in product '{product}'")]
    InvalidSource { product: String, band: String },
    #[error("Invalid value for parameter '{parameter}': {reason}")]
    ParameterValidation { parameter: String, reason: String },
    #[error("Pixel ({x}, {y}) lies outside of {bounds:?}")]
    OutOfBounds { x: usize, y: usize, bounds: PixelBounds },
    #[error("Cyclic dependency detected while resolving band '{band}'")]
    CyclicDependency { band: String },
    #[error("Computation of band '{band}' failed: {message}")]
    Computation { band: String, message: String },
    #[error("Computation was cancelled")]
    Cancelled,
    #[error("Band '{band}' does not exist in product '{product}'")]
    UnknownBand { product: String, band: String },
    #[error("Band '{band}' already exists in product '{product}'")]
    DuplicateBand { product: String, band: String },
    #[error("Band '{band}' has size {actual:?}, expected {expected:?}")]
    RasterSizeMismatch {
        band: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Expected samples of type {expected:?}, found {actual:?}")]
    DataTypeMismatch { expected: DataType, actual: DataType },
    #[error("There is no intersection between bounds")]
    NoIntersection,
    #[error("Invalid expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },
    #[error("Product '{0}' has been disposed")]
    Disposed(String),
    #[error("No reader plug-in qualifies for '{0}'")]
    NoReader(String),
    #[error(transparent)]
    Io(Arc<std::io::Error>),
    #[cfg(feature = "gdal")]
    #[error(transparent)]
    Gdal(Arc<gdal::errors::GdalError>),
}

impl RasterOpsError {
    /// Cooperative abort, as opposed to a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RasterOpsError::Cancelled)
    }

    pub fn computation(band: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RasterOpsError::Computation {
            band: band.into(),
            message: err.to_string(),
        }
    }

    pub fn parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        RasterOpsError::ParameterValidation {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for RasterOpsError {
    fn from(value: std::io::Error) -> Self {
        RasterOpsError::Io(Arc::new(value))
    }
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for RasterOpsError {
    fn from(value: gdal::errors::GdalError) -> Self {
        RasterOpsError::Gdal(Arc::new(value))
    }
}
