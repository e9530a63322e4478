//! Placement engine error types.

use thiserror::Error;
use uuid::Uuid;

use nodegrid_core::ValidationError;

/// Errors that fail an allocation call outright. Per-server problems are
/// never errors; they surface as rejection reasons instead.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("invalid VM: {0}")]
    InvalidVm(ValidationError),

    #[error("invalid image: {0}")]
    InvalidImage(ValidationError),

    #[error("invalid package: {0}")]
    InvalidPackage(ValidationError),

    #[error("invalid ticket {id}: {err}")]
    InvalidTicket { id: Uuid, err: ValidationError },

    #[error("invalid defaults: {0}")]
    InvalidDefaults(ValidationError),

    #[error("unknown algorithm \"{0}\" in pipeline description")]
    UnknownAlgorithm(String),

    #[error("invalid pipeline description: {0}")]
    InvalidDescription(String),
}

pub type AllocResult<T> = Result<T, AllocError>;
