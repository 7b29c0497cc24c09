use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::hash::ContentHash;

pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Address and length of a payload that is now held locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedBlock {
    pub hash: ContentHash,
    pub size: u64,
}

/// Local copies of content payloads, addressed by their SHA-256.
///
/// A payload is pinned on upload, read back by the commitment job and released once a provider
/// holds it. Blocks are immutable and shared by every content with the same bytes, so
/// implementations must tolerate a release racing with open readers.
#[async_trait]
pub trait Blockstore: Send + Sync {
    /// Stream a payload in. Pinning bytes that are already present keeps the existing block.
    async fn pin(&self, reader: BoxReader) -> Result<PinnedBlock, StorageError>;

    async fn pin_bytes(&self, data: &[u8]) -> Result<PinnedBlock, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.pin(reader).await
    }

    /// Stream a pinned payload back out. `NotFound` once it has been released.
    async fn open(&self, hash: &ContentHash) -> Result<BoxReader, StorageError>;

    async fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Drop the local copy. Returns `false` if it was already gone.
    async fn release(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}
