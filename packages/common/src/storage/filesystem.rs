use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{Blockstore, BoxReader, PinnedBlock};

const READ_CHUNK: usize = 256 * 1024;

/// Blocks on local disk, sharded as `{base}/{first byte hex}/{rest hex}`.
///
/// Writes land in `{base}/.tmp` first and are renamed into place, so readers never see a
/// partially written block.
pub struct FilesystemBlockstore {
    base_path: PathBuf,
    max_size: u64,
}

impl FilesystemBlockstore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn block_path(&self, hash: &ContentHash) -> PathBuf {
        let (dir, file) = hash.shard();
        self.base_path.join(dir).join(file)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn commit(&self, temp: &Path, hash: &ContentHash) -> Result<(), StorageError> {
        let target = self.block_path(hash);
        if fs::try_exists(&target).await? {
            let _ = fs::remove_file(temp).await;
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(temp, &target).await {
            let _ = fs::remove_file(temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Blockstore for FilesystemBlockstore {
    async fn pin(&self, mut reader: BoxReader) -> Result<PinnedBlock, StorageError> {
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&temp).await;
                    return Err(e.into());
                }
            };

            total += n as u64;
            if total > self.max_size {
                drop(file);
                let _ = fs::remove_file(&temp).await;
                return Err(StorageError::SizeLimitExceeded {
                    actual: total,
                    limit: self.max_size,
                });
            }

            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }

        file.flush().await?;
        drop(file);

        let hash = ContentHash::from_bytes(hasher.finalize().into());
        self.commit(&temp, &hash).await?;
        Ok(PinnedBlock { hash, size: total })
    }

    async fn open(&self, hash: &ContentHash) -> Result<BoxReader, StorageError> {
        match fs::File::open(self.block_path(hash)).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(fs::try_exists(self.block_path(hash)).await?)
    }

    async fn release(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        match fs::remove_file(self.block_path(hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
