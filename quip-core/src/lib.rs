//! Quip Core - storage and lifecycle engine for ephemeral file and paste sharing
//!
//! Entries are created with a fixed lifetime and an optional access limit:
//! - file payloads are streamed into a content blob store
//! - entry records live in SQLite with atomic access counters
//! - reads check liveness lazily; a background reaper reclaims space

pub mod clock;
pub mod entry;
pub mod error;
pub mod id;
pub mod reaper;
pub mod service;
pub mod storage;
pub mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{Entry, EntryContent, EntryKind, FileMeta, PasteMeta};
pub use error::{QuipError, Result};
pub use id::{IdGenerator, is_well_formed};
pub use reaper::{ReapStats, Reaper, ReaperHandle};
pub use service::{
    ContentService, CreateFileRequest, CreatePasteRequest, FileDownload, ServiceLimits,
    StagedBlob, download_name,
};
pub use storage::{BlobReader, BlobStore, MetadataStore, compute_hash};
pub use ttl::Ttl;
