use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuipError {
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Never existed, expired by time, or out of accesses. Callers cannot tell which.
    #[error("not found or expired")]
    NotFoundOrExpired,

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QuipError {
    /// True for failures of the blob or metadata layer, as opposed to caller mistakes.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            QuipError::Storage(_)
                | QuipError::Io(_)
                | QuipError::Database(_)
                | QuipError::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QuipError>;
