use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommpError {
    #[error("failed to read payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {size} bytes is below the {min} byte minimum")]
    PayloadTooSmall { size: usize, min: usize },

    #[error("no leaves to aggregate")]
    NoLeaves,

    #[error("piece of {size} bytes exceeds the {max} byte maximum")]
    PieceTooLarge { size: u64, max: u64 },

    #[error("leaf hasher for leaf {index} exited without a result")]
    LeafHasher { index: usize },

    #[error("padded leaf size {0} must be a power of two between 128 bytes and the maximum piece size")]
    InvalidLeafSize(u64),

    #[error("invalid piece cid: {0}")]
    InvalidPieceCid(String),
}
