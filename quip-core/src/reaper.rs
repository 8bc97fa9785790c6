//! Background reclamation of non-live entries.
//!
//! Reads never delete anything; they only refuse non-live entries. The reaper
//! is what frees the disk space, blob first and then metadata, so a crash in
//! between leaves metadata that the next cycle retries.

use crate::clock::Clock;
use crate::error::{QuipError, Result};
use crate::storage::{BlobFile, BlobStore, ExpiredEntry, MetadataStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Outcome of one reclamation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub reclaimed: u64,
    pub failed: u64,
}

pub struct Reaper {
    metadata: Arc<MetadataStore>,
    blobs: Arc<BlobStore>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl Reaper {
    pub fn new(
        metadata: Arc<MetadataStore>,
        blobs: Arc<BlobStore>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            metadata,
            blobs,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Reclaim every entry that is not live at the current instant.
    ///
    /// A failure on one entry is logged and counted; the rest of the scan
    /// continues and the entry is retried next cycle.
    pub async fn run_cycle(&self) -> ReapStats {
        let now = self.clock.now();
        let mut stats = ReapStats::default();

        // The scan borrows a blocking iterator; collect each page before
        // awaiting blob deletes.
        let mut pending: Vec<ExpiredEntry> = Vec::with_capacity(self.batch_size);
        let mut scan = self.metadata.list_expired(now, self.batch_size);

        loop {
            pending.clear();
            let mut scan_failed = false;
            for item in scan.by_ref().take(self.batch_size) {
                match item {
                    Ok(entry) => pending.push(entry),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to scan for expired entries");
                        stats.failed += 1;
                        scan_failed = true;
                        break;
                    }
                }
            }

            if pending.is_empty() {
                break;
            }

            for entry in &pending {
                match self.reclaim(entry).await {
                    Ok(()) => stats.reclaimed += 1,
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "Failed to reclaim entry");
                        stats.failed += 1;
                    }
                }
            }

            if scan_failed {
                break;
            }
        }

        if stats.reclaimed > 0 || stats.failed > 0 {
            tracing::info!(
                reclaimed = stats.reclaimed,
                failed = stats.failed,
                "Reaper cycle finished"
            );
        } else {
            tracing::debug!("Reaper cycle found nothing to reclaim");
        }

        stats
    }

    async fn reclaim(&self, entry: &ExpiredEntry) -> Result<()> {
        if let Some(storage_key) = &entry.storage_key {
            self.blobs.delete(storage_key).await?;
        }
        self.metadata.delete(&entry.id)?;
        tracing::debug!(id = %entry.id, "Reclaimed entry");
        Ok(())
    }

    /// Remove blobs, and leftover temp files, that no entry references.
    ///
    /// Only files older than `grace` are touched, so uploads still being
    /// written or just being committed are left alone. The store is walked one
    /// shard at a time with a single reference lookup per shard.
    pub async fn sweep_orphans(&self, grace: Duration) -> Result<u64> {
        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .ok_or_else(|| QuipError::Internal("orphan grace period out of range".to_string()))?;

        let mut removed = 0;
        for shard in self.blobs.list_shards().await? {
            let candidates: Vec<BlobFile> = self
                .blobs
                .list_shard(&shard)
                .await?
                .into_iter()
                .filter(|blob| blob.modified <= cutoff)
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let keys: Vec<String> = candidates
                .iter()
                .filter(|blob| !blob.is_temp)
                .map(|blob| blob.storage_key.clone())
                .collect();
            let referenced = self.metadata.referenced_storage_keys(&keys)?;

            for blob in candidates {
                if !blob.is_temp && referenced.contains(&blob.storage_key) {
                    continue;
                }
                match self.blobs.delete_file(&blob).await {
                    Ok(()) => {
                        removed += 1;
                        tracing::info!(
                            storage_key = %blob.storage_key,
                            temp = blob.is_temp,
                            "Removed orphaned blob"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            storage_key = %blob.storage_key,
                            error = %e,
                            "Failed to remove orphaned blob"
                        );
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Run `run_cycle` every `interval` on the tokio runtime until shut down.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Reaper stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "Reaper started");
        ReaperHandle { shutdown_tx, task }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the loop to stop and wait for the in-flight cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Reaper task failed");
        }
    }
}
