//! Piece commitments (CommP) for storage deals.
//!
//! The payload is fr32-padded, split into fixed-size leaves that are hashed in parallel, and the
//! leaf roots are aggregated into a single binary Merkle root over SHA-256 truncated to 254 bits.
//! The result does not depend on how many hashers ran.

mod error;
pub mod fr32;
mod piece_cid;
pub mod tree;
mod writer;

pub use error::CommpError;
pub use fr32::{padded_size, unpadded_size};
pub use piece_cid::{FIL_COMMITMENT_UNSEALED, PieceCid, SHA2_256_TRUNC254_PADDED};
pub use tree::{Commitment, MIN_PAYLOAD, zero_commitment};
pub use writer::{
    CommpWriter, DEFAULT_PADDED_LEAF_SIZE, LeafSummary, MAX_PIECE_SIZE, PieceInfo, compute,
    compute_with_leaf_size,
};
