use thiserror::Error;

/// Boxed source error from a database driver or cache client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Caller or precondition violation. Always raised before any mutating
    /// statement is executed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored value could not be converted to or from its declared type.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),

    #[error("Cache error: {0}")]
    Cache(#[source] BoxError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        StorageError::DecodeFailure(message.into())
    }

    /// Wrap a database driver error, keeping it as the source.
    pub fn storage(error: impl Into<BoxError>) -> Self {
        StorageError::Storage(error.into())
    }

    /// Wrap a cache client error, keeping it as the source.
    pub fn cache(error: impl Into<BoxError>) -> Self {
        StorageError::Cache(error.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StorageError::InvalidArgument(_))
    }

    pub fn is_decode_failure(&self) -> bool {
        matches!(self, StorageError::DecodeFailure(_))
    }
}
