use thiserror::Error;

/// Errors returned by a [`Blockstore`](super::Blockstore).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block not found: {0}")]
    NotFound(String),
    #[error("blockstore IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid content address: {0}")]
    InvalidHash(String),
    #[error("block exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },
}
