use crate::error::{QuipError, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Read granularity for downloads.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

const TEMP_EXTENSION: &str = "tmp";

/// Forward-only byte stream over a stored blob. Dropping it closes the file.
pub type BlobReader = ReaderStream<fs::File>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutBlobResult {
    pub storage_key: String,
    pub size: u64,
    pub sha256: String,
}

/// A file found on disk by [`BlobStore::list_shard`].
#[derive(Debug, Clone)]
pub struct BlobFile {
    pub storage_key: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    /// Leftover of an interrupted write.
    pub is_temp: bool,
}

/// BlobStore keeps one file per blob under blobs/{prefix}/{storage_key}.
/// A blob is visible only after its temp file has been fully written and renamed.
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("blobs"))?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Stream `body` to disk under `storage_key`.
    ///
    /// Bytes are hashed and counted as they arrive, so the recorded size is
    /// what was written, not what the client claimed. If the source fails,
    /// `limit` is exceeded, or the disk write fails, the partial file is
    /// removed before the error is returned.
    pub async fn put<S>(
        &self,
        storage_key: &str,
        body: S,
        limit: Option<u64>,
    ) -> Result<PutBlobResult>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        validate_key(storage_key)?;
        let final_path = self.blob_path(storage_key);
        let temp_path = final_path.with_extension(TEMP_EXTENSION);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match self.write_temp(&temp_path, body, limit).await {
            Ok((size, sha256)) => {
                if let Err(e) = fs::rename(&temp_path, &final_path).await {
                    remove_quietly(&temp_path).await;
                    return Err(e.into());
                }

                tracing::debug!(storage_key, size, "Stored blob");
                Ok(PutBlobResult {
                    storage_key: storage_key.to_string(),
                    size,
                    sha256,
                })
            }
            Err(e) => {
                remove_quietly(&temp_path).await;
                tracing::debug!(storage_key, error = %e, "Discarded partial blob");
                Err(e)
            }
        }
    }

    async fn write_temp<S>(
        &self,
        temp_path: &Path,
        body: S,
        limit: Option<u64>,
    ) -> Result<(u64, String)>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let mut body = std::pin::pin!(body);
        let mut file = fs::File::create(temp_path).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            if let Some(limit) = limit {
                if size > limit {
                    return Err(QuipError::PayloadTooLarge { limit });
                }
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }

        file.sync_all().await?;
        drop(file);

        Ok((size, hex::encode(hasher.finalize())))
    }

    /// Open a blob for streaming.
    pub async fn get(&self, storage_key: &str) -> Result<BlobReader> {
        validate_key(storage_key)?;
        let path = self.blob_path(storage_key);

        match fs::File::open(&path).await {
            Ok(file) => Ok(ReaderStream::with_capacity(file, READ_CHUNK_SIZE)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(QuipError::BlobNotFound(storage_key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, storage_key: &str) -> bool {
        validate_key(storage_key).is_ok() && self.blob_path(storage_key).exists()
    }

    /// Remove a blob. Deleting an absent key is not an error.
    pub async fn delete(&self, storage_key: &str) -> Result<()> {
        validate_key(storage_key)?;
        let path = self.blob_path(storage_key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(storage_key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a file reported by `list_shard`, including temp leftovers.
    pub async fn delete_file(&self, blob: &BlobFile) -> Result<()> {
        match fs::remove_file(&blob.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk every blob file on disk.
    pub async fn list_blobs(&self) -> Result<Vec<BlobFile>> {
        let mut blobs = Vec::new();
        for shard in self.list_shards().await? {
            blobs.extend(self.list_shard(&shard).await?);
        }
        Ok(blobs)
    }

    /// Shard directories under blobs/, so callers can walk the store one
    /// shard at a time instead of holding every file in memory.
    pub async fn list_shards(&self) -> Result<Vec<PathBuf>> {
        let mut shards = Vec::new();
        let mut prefixes = fs::read_dir(self.base_path.join("blobs")).await?;

        while let Some(prefix) = prefixes.next_entry().await? {
            if prefix.file_type().await?.is_dir() {
                shards.push(prefix.path());
            }
        }

        shards.sort();
        Ok(shards)
    }

    /// Blob files inside one shard returned by `list_shards`. A shard that
    /// vanished in the meantime is empty.
    pub async fn list_shard(&self, shard: &Path) -> Result<Vec<BlobFile>> {
        let mut entries = match fs::read_dir(shard).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut blobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let is_temp = path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION);

            blobs.push(BlobFile {
                storage_key: stem.to_string(),
                modified: metadata.modified()?,
                path,
                is_temp,
            });
        }

        Ok(blobs)
    }

    fn blob_path(&self, storage_key: &str) -> PathBuf {
        self.base_path
            .join("blobs")
            .join(key_prefix(storage_key))
            .join(storage_key)
    }
}

/// Shard directory taken from the random tail of the key.
fn key_prefix(storage_key: &str) -> String {
    let tail = &storage_key[storage_key.len().saturating_sub(2)..];
    tail.to_ascii_lowercase()
}

fn validate_key(storage_key: &str) -> Result<()> {
    if storage_key.len() < 2 || !storage_key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(QuipError::InvalidRequest(format!(
            "invalid storage key: {}",
            storage_key
        )));
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp blob");
        }
    }
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
