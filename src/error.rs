use thiserror::Error;

/// Rejection of a submitted secret. Always the caller's fault, never the server's.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please share an actual secret.")]
    TooShort { min: usize, actual: usize },
}

/// Failures raised by a collection backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt entry at offset {offset}: {reason}")]
    Codec { offset: u64, reason: String },

    #[error("Document '{0}' already exists")]
    DuplicateId(String),

    #[error("Poisoned lock")]
    Poisoned,

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors surfaced by `RecordStore` and the exchange.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Revision conflict on '{id}'")]
    Conflict { id: String },

    #[error("Document '{id}' no longer exists")]
    NotFound { id: String },

    #[error("Gave up updating '{id}' after {attempts} attempts")]
    RetryExhausted { id: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
