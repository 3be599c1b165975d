//! Service-wide error taxonomy.
//!
//! Every failure a caller can observe is one of these kinds. The HTTP layer
//! renders all of them through the same `{"message": "Error : ..."}`
//! envelope, so callers only tell them apart by message text.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Malformed input, rejected during validation.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("category '{0}' not found.")]
    UnknownCategory(String),

    #[error("binary predicate or geometric operation '{0}' not found.")]
    UnknownOperation(String),

    /// Coordinate or region outside the DEM extent.
    #[error("{0}")]
    OutOfBounds(String),

    /// An external raster or geometry computation failed.
    #[error("{0}")]
    ComputationFailed(String),

    /// The final coordinate transform of a result failed.
    #[error("{0}")]
    ReprojectionFailed(String),
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidArgument(message.into())
    }

    /// Stable short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::UnknownCategory(_) => "unknown_category",
            ServiceError::UnknownOperation(_) => "unknown_operation",
            ServiceError::OutOfBounds(_) => "out_of_bounds",
            ServiceError::ComputationFailed(_) => "computation_failed",
            ServiceError::ReprojectionFailed(_) => "reprojection_failed",
        }
    }

    /// Text placed in the `message` member of an error response.
    pub fn envelope_message(&self) -> String {
        format!("Error : {self}")
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
