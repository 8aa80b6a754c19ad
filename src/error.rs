use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// Errors returned by every registry operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("name already taken: {0}")]
    DuplicateName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream registry is disabled")]
    UpstreamDisabled,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("dependency missing: {0}")]
    DependencyMissing(String),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

impl From<DieselError> for RegistryError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                RegistryError::DuplicateName(info.message().to_string())
            }
            other => RegistryError::StorageFailure(format!("Database error: {other}")),
        }
    }
}

impl From<diesel::r2d2::Error> for RegistryError {
    fn from(err: diesel::r2d2::Error) -> Self {
        RegistryError::StorageFailure(format!("Database connection error: {err}"))
    }
}

impl From<diesel::r2d2::PoolError> for RegistryError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        RegistryError::StorageFailure(format!("Database pool error: {err}"))
    }
}

impl From<BlobError> for RegistryError {
    fn from(err: BlobError) -> Self {
        RegistryError::StorageFailure(format!("Blob store error: {err}"))
    }
}

/// Errors raised by a blob store backend.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("blob i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = std::result::Result<T, BlobError>;

/// Errors raised by an upstream registry client. These never reach
/// registry callers; the caching proxy collapses them to `NotFound`.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream registry is disabled")]
    Disabled,

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
