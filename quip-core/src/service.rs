//! File and paste operations on top of the blob and metadata stores.
//!
//! Every read goes through a lazy liveness check; an entry that is absent,
//! of the other kind, expired by time or out of accesses is reported as the
//! same `NotFoundOrExpired` error.

use crate::clock::Clock;
use crate::entry::{Entry, EntryContent, EntryKind, FileMeta, PasteMeta};
use crate::error::{QuipError, Result};
use crate::id::{IdGenerator, is_well_formed};
use crate::storage::{BlobReader, BlobStore, MetadataStore, PutBlobResult};
use crate::ttl::Ttl;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::Stream;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_PASTE_BYTES: u64 = 1024 * 1024;

const DEFAULT_FILE_NAME: &str = "file";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_LANGUAGE: &str = "text";

#[derive(Debug, Clone, Copy)]
pub struct ServiceLimits {
    pub max_upload_bytes: u64,
    pub max_paste_bytes: u64,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_paste_bytes: DEFAULT_MAX_PASTE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateFileRequest {
    pub name: String,
    pub content_type: String,
    pub ttl: String,
    /// `None` or zero means unlimited.
    pub max_downloads: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CreatePasteRequest {
    pub content: String,
    pub language: String,
    pub title: String,
    pub ttl: String,
    /// `None` or zero means unlimited.
    pub max_views: Option<u64>,
}

/// A blob written to disk but not yet referenced by any entry.
///
/// Must be passed to `commit_staged_file` or `discard_staged`.
#[derive(Debug)]
pub struct StagedBlob {
    blob: PutBlobResult,
}

impl StagedBlob {
    pub fn size(&self) -> u64 {
        self.blob.size
    }
}

/// An open download: the byte stream plus the entry after its access was counted.
pub struct FileDownload {
    pub reader: BlobReader,
    pub entry: Entry,
}

impl fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDownload")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

pub struct ContentService {
    blobs: Arc<BlobStore>,
    metadata: Arc<MetadataStore>,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
    limits: ServiceLimits,
}

impl ContentService {
    pub fn new(
        blobs: Arc<BlobStore>,
        metadata: Arc<MetadataStore>,
        ids: IdGenerator,
        clock: Arc<dyn Clock>,
        limits: ServiceLimits,
    ) -> Self {
        Self {
            blobs,
            metadata,
            ids,
            clock,
            limits,
        }
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validate the request, stream `body` into the blob store and record the entry.
    pub async fn create_file<S>(&self, req: CreateFileRequest, body: S) -> Result<Entry>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let ttl: Ttl = req.ttl.parse()?;
        let staged = self.stage_blob(body).await?;
        self.commit_file(req, ttl, staged).await
    }

    /// Write a blob before its request has been fully validated.
    ///
    /// Used when the upload body arrives ahead of the fields that describe it.
    pub async fn stage_blob<S>(&self, body: S) -> Result<StagedBlob>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let storage_key = self.ids.new_storage_key();
        let blob = self
            .blobs
            .put(&storage_key, body, Some(self.limits.max_upload_bytes))
            .await?;
        Ok(StagedBlob { blob })
    }

    /// Validate `req` and record an entry for an already staged blob.
    ///
    /// The staged blob is deleted if anything fails.
    pub async fn commit_staged_file(
        &self,
        req: CreateFileRequest,
        staged: StagedBlob,
    ) -> Result<Entry> {
        let ttl = match req.ttl.parse::<Ttl>() {
            Ok(ttl) => ttl,
            Err(e) => {
                self.discard_staged(staged).await;
                return Err(e);
            }
        };
        self.commit_file(req, ttl, staged).await
    }

    pub async fn discard_staged(&self, staged: StagedBlob) {
        let storage_key = staged.blob.storage_key;
        if let Err(e) = self.blobs.delete(&storage_key).await {
            tracing::warn!(
                storage_key = %storage_key,
                error = %e,
                "Failed to discard staged blob"
            );
        }
    }

    async fn commit_file(
        &self,
        req: CreateFileRequest,
        ttl: Ttl,
        staged: StagedBlob,
    ) -> Result<Entry> {
        let now = self.creation_time();
        let entry = Entry {
            id: self.ids.new_id(),
            created_at: now,
            expires_at: now + ttl.duration(),
            access_count: 0,
            max_access: req.max_downloads.unwrap_or(0),
            content: EntryContent::File(FileMeta {
                original_name: normalize_file_name(&req.name),
                content_type: non_empty_or(&req.content_type, DEFAULT_CONTENT_TYPE),
                size: staged.blob.size,
                storage_key: staged.blob.storage_key.clone(),
                sha256: staged.blob.sha256.clone(),
            }),
        };

        if let Err(e) = self.metadata.create(&entry) {
            if matches!(e, QuipError::AlreadyExists(_)) {
                tracing::error!(id = %entry.id, "Generated id collided with an existing entry");
            } else {
                tracing::error!(
                    id = %entry.id,
                    error = %e,
                    "Failed to store file metadata, cleaning up blob"
                );
            }
            self.discard_staged(staged).await;
            return Err(e);
        }

        tracing::info!(
            id = %entry.id,
            size = staged.blob.size,
            ttl = %ttl,
            max_downloads = entry.max_access,
            "File uploaded"
        );
        Ok(entry)
    }

    pub async fn create_paste(&self, req: CreatePasteRequest) -> Result<Entry> {
        let ttl: Ttl = req.ttl.parse()?;
        if req.content.is_empty() {
            return Err(QuipError::InvalidRequest("content must not be empty".to_string()));
        }
        if req.content.len() as u64 > self.limits.max_paste_bytes {
            return Err(QuipError::PayloadTooLarge {
                limit: self.limits.max_paste_bytes,
            });
        }

        let now = self.creation_time();
        let entry = Entry {
            id: self.ids.new_id(),
            created_at: now,
            expires_at: now + ttl.duration(),
            access_count: 0,
            max_access: req.max_views.unwrap_or(0),
            content: EntryContent::Paste(PasteMeta {
                content: req.content,
                language: non_empty_or(req.language.trim(), DEFAULT_LANGUAGE),
                title: req.title,
            }),
        };

        if let Err(e) = self.metadata.create(&entry) {
            if matches!(e, QuipError::AlreadyExists(_)) {
                tracing::error!(id = %entry.id, "Generated id collided with an existing entry");
            }
            return Err(e);
        }

        tracing::info!(id = %entry.id, ttl = %ttl, max_views = entry.max_access, "Paste created");
        Ok(entry)
    }

    /// File metadata. Never counts as a download.
    pub async fn get_file_info(&self, id: &str) -> Result<Entry> {
        self.load_live(id, EntryKind::File)
    }

    /// Open the blob and count one download.
    ///
    /// The access is counted when the stream is handed out, so a download
    /// abandoned halfway still uses up its slot. The request that brings the
    /// count to the limit succeeds; later ones fail.
    pub async fn open_file_download(&self, id: &str) -> Result<FileDownload> {
        let entry = self.load_live(id, EntryKind::File)?;
        let storage_key = entry
            .storage_key()
            .ok_or_else(|| QuipError::Internal(format!("file entry {} has no storage key", id)))?;

        let reader = match self.blobs.get(storage_key).await {
            Ok(reader) => reader,
            Err(QuipError::BlobNotFound(key)) => {
                tracing::warn!(id, storage_key = %key, "File entry points at a missing blob");
                return Err(QuipError::NotFoundOrExpired);
            }
            Err(e) => return Err(e),
        };

        // Dropping `reader` on failure releases the file handle.
        let entry = self
            .metadata
            .increment_access_and_get(id, EntryKind::File, self.clock.now())?
            .ok_or(QuipError::NotFoundOrExpired)?;

        tracing::debug!(id, downloads = entry.access_count, "File download started");
        Ok(FileDownload { reader, entry })
    }

    /// Paste metadata. Never counts as a view.
    ///
    /// Callers must not expose the content of a view-limited paste from here;
    /// `get_paste_raw` is the only read that consumes a view.
    pub async fn get_paste(&self, id: &str) -> Result<Entry> {
        self.load_live(id, EntryKind::Paste)
    }

    /// Paste content. Counts one view.
    pub async fn get_paste_raw(&self, id: &str) -> Result<Entry> {
        if !is_well_formed(id) {
            return Err(QuipError::NotFoundOrExpired);
        }
        let entry = self
            .metadata
            .increment_access_and_get(id, EntryKind::Paste, self.clock.now())?
            .ok_or(QuipError::NotFoundOrExpired)?;

        tracing::debug!(id, views = entry.access_count, "Paste viewed");
        Ok(entry)
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        let entry = self.load_live(id, EntryKind::File)?;
        if let Some(storage_key) = entry.storage_key() {
            self.blobs.delete(storage_key).await?;
        }
        self.metadata.delete(id)?;
        tracing::info!(id, "File deleted");
        Ok(())
    }

    pub async fn delete_paste(&self, id: &str) -> Result<()> {
        self.load_live(id, EntryKind::Paste)?;
        self.metadata.delete(id)?;
        tracing::info!(id, "Paste deleted");
        Ok(())
    }

    /// Timestamps are stored with millisecond precision; truncate up front so the
    /// returned entry matches every later read.
    fn creation_time(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    fn load_live(&self, id: &str, kind: EntryKind) -> Result<Entry> {
        if !is_well_formed(id) {
            return Err(QuipError::NotFoundOrExpired);
        }
        match self.metadata.get(id)? {
            Some(entry) if entry.kind() == kind && entry.is_live(self.clock.now()) => Ok(entry),
            _ => Err(QuipError::NotFoundOrExpired),
        }
    }
}

/// Suggested name for a download: the stored name with a UTC timestamp
/// inserted before the extension, e.g. `report_20260101_120000.pdf`.
pub fn download_name(original_name: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    match original_name.rfind('.') {
        Some(dot) if dot > 0 => format!(
            "{}_{}{}",
            &original_name[..dot],
            timestamp,
            &original_name[dot..]
        ),
        _ => format!("{}_{}", original_name, timestamp),
    }
}

/// Keep only the last path component of a client supplied name.
fn normalize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    non_empty_or(base, DEFAULT_FILE_NAME)
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use futures_util::{StreamExt, stream};

    struct Harness {
        _dir: tempfile::TempDir,
        service: Arc<ContentService>,
        blobs: Arc<BlobStore>,
        metadata: Arc<MetadataStore>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path().to_path_buf()).unwrap());
        let metadata = Arc::new(MetadataStore::new(dir.path().join("quip.db")).unwrap());
        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(ContentService::new(
            blobs.clone(),
            metadata.clone(),
            IdGenerator::new().unwrap(),
            clock.clone(),
            ServiceLimits {
                max_upload_bytes: 1024 * 1024,
                max_paste_bytes: 64,
            },
        ));
        Harness {
            _dir: dir,
            service,
            blobs,
            metadata,
            clock,
        }
    }

    fn body(data: &[u8]) -> impl Stream<Item = Result<Bytes>> + use<> {
        let parts: Vec<Result<Bytes>> = data
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(parts)
    }

    fn file_req(ttl: &str, max_downloads: Option<u64>) -> CreateFileRequest {
        CreateFileRequest {
            name: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            ttl: ttl.to_string(),
            max_downloads,
        }
    }

    fn paste_req(content: &str, ttl: &str, max_views: Option<u64>) -> CreatePasteRequest {
        CreatePasteRequest {
            content: content.to_string(),
            language: String::new(),
            title: String::new(),
            ttl: ttl.to_string(),
            max_views,
        }
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let h = harness();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();

        let entry = h
            .service
            .create_file(file_req("1h", None), body(&data))
            .await
            .unwrap();
        assert_eq!(entry.as_file().unwrap().size, data.len() as u64);
        assert_eq!(entry.expires_at - entry.created_at, Duration::hours(1));

        let info = h.service.get_file_info(&entry.id).await.unwrap();
        assert_eq!(info.access_count, 0);

        let download = h.service.open_file_download(&entry.id).await.unwrap();
        assert_eq!(download.entry.access_count, 1);
        assert_eq!(read_all(download.reader).await, data);
    }

    #[tokio::test]
    async fn test_invalid_ttl_writes_nothing() {
        let h = harness();
        let err = h
            .service
            .create_file(file_req("2h", None), body(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::InvalidTtl(_)));
        assert!(h.blobs.list_blobs().await.unwrap().is_empty());
        assert_eq!(h.metadata.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_partial_blob() {
        let h = harness();
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(QuipError::Storage("connection reset".to_string())),
        ]);
        let err = h
            .service
            .create_file(file_req("1h", None), failing)
            .await
            .unwrap_err();
        assert!(err.is_storage_failure());
        assert!(h.blobs.list_blobs().await.unwrap().is_empty());
        assert_eq!(h.metadata.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let h = harness();
        let data = vec![1u8; 1024 * 1024 + 1];
        let err = h
            .service
            .create_file(file_req("1h", None), body(&data))
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::PayloadTooLarge { .. }));
        assert!(h.blobs.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staged_blob_is_discarded_on_bad_ttl() {
        let h = harness();
        let staged = h.service.stage_blob(body(b"early bytes")).await.unwrap();
        assert_eq!(staged.size(), 11);
        assert_eq!(h.blobs.list_blobs().await.unwrap().len(), 1);

        let err = h
            .service
            .commit_staged_file(file_req("forever", None), staged)
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::InvalidTtl(_)));
        assert!(h.blobs.list_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_name_and_content_type_defaults() {
        let h = harness();
        let entry = h
            .service
            .create_file(
                CreateFileRequest {
                    name: "../../etc/".to_string(),
                    content_type: String::new(),
                    ttl: "24h".to_string(),
                    max_downloads: None,
                },
                body(b"x"),
            )
            .await
            .unwrap();
        let file = entry.as_file().unwrap();
        assert_eq!(file.original_name, "file");
        assert_eq!(file.content_type, "application/octet-stream");

        let entry = h
            .service
            .create_file(
                CreateFileRequest {
                    name: "C:\\Users\\me\\notes.txt".to_string(),
                    ..file_req("24h", None)
                },
                body(b"x"),
            )
            .await
            .unwrap();
        assert_eq!(entry.as_file().unwrap().original_name, "notes.txt");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_downloads_respect_limit() {
        let h = harness();
        let k = 5u64;
        let entry = h
            .service
            .create_file(file_req("1h", Some(k)), body(b"shared"))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..k)
            .map(|_| {
                let service = h.service.clone();
                let id = entry.id.clone();
                tokio::spawn(async move { service.open_file_download(&id).await })
            })
            .collect();

        let mut counts = Vec::new();
        for task in tasks {
            let download = task.await.unwrap().unwrap();
            counts.push(download.entry.access_count);
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=k).collect::<Vec<_>>());

        let err = h.service.open_file_download(&entry.id).await.unwrap_err();
        assert!(matches!(err, QuipError::NotFoundOrExpired));
        assert!(matches!(
            h.service.get_file_info(&entry.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_expiry_by_time() {
        let h = harness();
        let entry = h
            .service
            .create_file(file_req("1h", None), body(b"soon gone"))
            .await
            .unwrap();
        assert!(h.service.get_file_info(&entry.id).await.is_ok());

        h.clock.advance(Duration::minutes(59));
        assert!(h.service.get_file_info(&entry.id).await.is_ok());

        h.clock.advance(Duration::minutes(1));
        assert!(matches!(
            h.service.get_file_info(&entry.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
        assert!(matches!(
            h.service.open_file_download(&entry.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_are_indistinguishable() {
        let h = harness();
        let paste = h.service.create_paste(paste_req("x", "1h", None)).await.unwrap();
        h.clock.advance(Duration::hours(2));

        let unknown = IdGenerator::new().unwrap().new_id();
        for id in [unknown.as_str(), paste.id.as_str(), "not an id"] {
            assert!(matches!(
                h.service.get_paste(id).await.unwrap_err(),
                QuipError::NotFoundOrExpired
            ));
            assert!(matches!(
                h.service.get_file_info(id).await.unwrap_err(),
                QuipError::NotFoundOrExpired
            ));
        }
    }

    #[tokio::test]
    async fn test_kinds_do_not_cross() {
        let h = harness();
        let paste = h.service.create_paste(paste_req("x", "1h", None)).await.unwrap();
        assert!(matches!(
            h.service.get_file_info(&paste.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
        assert!(matches!(
            h.service.delete_file(&paste.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_paste_views_count_only_raw_reads() {
        let h = harness();
        let req = CreatePasteRequest {
            content: "hello".to_string(),
            language: "text".to_string(),
            title: String::new(),
            ttl: "24h".to_string(),
            max_views: None,
        };
        let paste = h.service.create_paste(req).await.unwrap();
        assert_eq!(paste.access_count, 0);

        let meta = h.service.get_paste(&paste.id).await.unwrap();
        assert_eq!(meta.access_count, 0);

        let raw = h.service.get_paste_raw(&paste.id).await.unwrap();
        assert_eq!(raw.as_paste().unwrap().content, "hello");
        assert_eq!(raw.access_count, 1);

        let meta = h.service.get_paste(&paste.id).await.unwrap();
        assert_eq!(meta.access_count, 1);
    }

    #[tokio::test]
    async fn test_paste_view_limit() {
        let h = harness();
        let paste = h
            .service
            .create_paste(paste_req("burn after reading", "1h", Some(1)))
            .await
            .unwrap();

        assert!(h.service.get_paste_raw(&paste.id).await.is_ok());
        assert!(matches!(
            h.service.get_paste_raw(&paste.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
        assert!(matches!(
            h.service.get_paste(&paste.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_paste_validation() {
        let h = harness();
        assert!(matches!(
            h.service.create_paste(paste_req("", "1h", None)).await.unwrap_err(),
            QuipError::InvalidRequest(_)
        ));
        assert!(matches!(
            h.service.create_paste(paste_req("hi", "1d", None)).await.unwrap_err(),
            QuipError::InvalidTtl(_)
        ));
        let big = "x".repeat(65);
        assert!(matches!(
            h.service.create_paste(paste_req(&big, "1h", None)).await.unwrap_err(),
            QuipError::PayloadTooLarge { limit: 64 }
        ));

        let paste = h.service.create_paste(paste_req("ok", "1h", None)).await.unwrap();
        assert_eq!(paste.as_paste().unwrap().language, "text");
        assert_eq!(h.metadata.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_file_removes_blob_and_metadata() {
        let h = harness();
        let entry = h
            .service
            .create_file(file_req("1h", None), body(b"to delete"))
            .await
            .unwrap();
        let storage_key = entry.storage_key().unwrap().to_string();
        assert!(h.blobs.exists(&storage_key));

        h.service.delete_file(&entry.id).await.unwrap();
        assert!(!h.blobs.exists(&storage_key));
        assert!(h.metadata.get(&entry.id).unwrap().is_none());
        assert!(matches!(
            h.service.delete_file(&entry.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_reads_as_not_found() {
        let h = harness();
        let entry = h
            .service
            .create_file(file_req("1h", Some(1)), body(b"gone"))
            .await
            .unwrap();
        h.blobs.delete(entry.storage_key().unwrap()).await.unwrap();

        assert!(matches!(
            h.service.open_file_download(&entry.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
        assert_eq!(h.metadata.get(&entry.id).unwrap().unwrap().access_count, 0);
    }

    #[tokio::test]
    async fn test_created_entries_match_stored_timestamps() {
        let h = harness();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
            + Duration::microseconds(700);
        h.clock.set(start);

        let paste = h.service.create_paste(paste_req("x", "1h", None)).await.unwrap();
        let stored = h.service.get_paste(&paste.id).await.unwrap();
        assert_eq!(paste.created_at, stored.created_at);
        assert_eq!(paste.expires_at, stored.expires_at);
        assert_eq!(paste, stored);

        let file = h
            .service
            .create_file(file_req("1h", None), body(b"x"))
            .await
            .unwrap();
        let stored = h.service.get_file_info(&file.id).await.unwrap();
        assert_eq!(file.expires_at, stored.expires_at);

        // Just past the stored expiry, both copies agree the paste is gone.
        h.clock.set(start + Duration::hours(1) - Duration::microseconds(300));
        assert!(!paste.is_live(h.clock.now()));
        assert!(matches!(
            h.service.get_paste(&paste.id).await.unwrap_err(),
            QuipError::NotFoundOrExpired
        ));
    }

    #[tokio::test]
    async fn test_file_download_debug_omits_reader() {
        let h = harness();
        let entry = h
            .service
            .create_file(file_req("1h", None), body(b"abc"))
            .await
            .unwrap();
        let download = h.service.open_file_download(&entry.id).await.unwrap();
        let rendered = format!("{:?}", download);
        assert!(rendered.starts_with("FileDownload"));
        assert!(rendered.contains(&entry.id));
        assert!(!rendered.contains("reader"));
    }

    #[test]
    fn test_download_name() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(download_name("report.pdf", now), "report_20260101_120000.pdf");
        assert_eq!(download_name("archive.tar.gz", now), "archive.tar_20260101_120000.gz");
        assert_eq!(download_name("README", now), "README_20260101_120000");
        assert_eq!(download_name(".env", now), ".env_20260101_120000");
    }
}
