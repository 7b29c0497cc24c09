//! Local content-addressed blockstore holding the bytes of pinned content until a provider has them.

mod error;
mod hash;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use filesystem::FilesystemBlockstore;
pub use hash::ContentHash;
pub use traits::{Blockstore, BoxReader, PinnedBlock};
