//! The stored record shared by files and pastes.

use crate::error::QuipError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Paste,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Paste => "paste",
        }
    }
}

impl FromStr for EntryKind {
    type Err = QuipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(EntryKind::File),
            "paste" => Ok(EntryKind::Paste),
            other => Err(QuipError::Internal(format!("unknown entry kind: {}", other))),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub original_name: String,
    pub content_type: String,
    /// Bytes actually written to the blob store.
    pub size: u64,
    pub storage_key: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteMeta {
    pub content: String,
    pub language: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryContent {
    File(FileMeta),
    Paste(PasteMeta),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    /// Zero means unlimited.
    pub max_access: u64,
    pub content: EntryContent,
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self.content {
            EntryContent::File(_) => EntryKind::File,
            EntryContent::Paste(_) => EntryKind::Paste,
        }
    }

    /// Live iff not past expiry and not out of accesses.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && (self.max_access == 0 || self.access_count < self.max_access)
    }

    pub fn is_expired_by_time(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_access_exhausted(&self) -> bool {
        self.max_access > 0 && self.access_count >= self.max_access
    }

    pub fn storage_key(&self) -> Option<&str> {
        match &self.content {
            EntryContent::File(file) => Some(&file.storage_key),
            EntryContent::Paste(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileMeta> {
        match &self.content {
            EntryContent::File(file) => Some(file),
            EntryContent::Paste(_) => None,
        }
    }

    pub fn as_paste(&self) -> Option<&PasteMeta> {
        match &self.content {
            EntryContent::Paste(paste) => Some(paste),
            EntryContent::File(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn paste_entry(max_access: u64, access_count: u64) -> Entry {
        let now = Utc::now();
        Entry {
            id: "abc".to_string(),
            created_at: now,
            expires_at: now + Duration::hours(1),
            access_count,
            max_access,
            content: EntryContent::Paste(PasteMeta {
                content: "hello".to_string(),
                language: "text".to_string(),
                title: String::new(),
            }),
        }
    }

    #[test]
    fn test_liveness_by_time() {
        let entry = paste_entry(0, 0);
        assert!(entry.is_live(entry.created_at));
        assert!(entry.is_live(entry.expires_at - Duration::milliseconds(1)));
        assert!(!entry.is_live(entry.expires_at));
        assert!(entry.is_expired_by_time(entry.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_liveness_by_count() {
        let now = Utc::now();
        assert!(paste_entry(0, 1_000).is_live(now));
        assert!(paste_entry(3, 2).is_live(now));
        assert!(!paste_entry(3, 3).is_live(now));
        assert!(paste_entry(3, 3).is_access_exhausted());
    }

    #[test]
    fn test_kind_and_accessors() {
        let entry = paste_entry(0, 0);
        assert_eq!(entry.kind(), EntryKind::Paste);
        assert!(entry.as_file().is_none());
        assert!(entry.storage_key().is_none());
        assert_eq!(entry.as_paste().unwrap().content, "hello");
        assert_eq!("file".parse::<EntryKind>().unwrap(), EntryKind::File);
        assert!("blob".parse::<EntryKind>().is_err());
    }
}
