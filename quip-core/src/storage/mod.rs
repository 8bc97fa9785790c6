//! Storage modules for Quip
//!
//! Provides filesystem blob storage and SQLite entry metadata.

pub mod blob_store;
pub mod metadata_store;

pub use blob_store::{BlobFile, BlobReader, BlobStore, PutBlobResult, READ_CHUNK_SIZE, compute_hash};
pub use metadata_store::{ExpiredEntry, ExpiredScan, MetadataStore};
