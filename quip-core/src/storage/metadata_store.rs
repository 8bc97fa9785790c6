use crate::entry::{Entry, EntryContent, EntryKind, FileMeta, PasteMeta};
use crate::error::{QuipError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ffi, params, params_from_iter};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTRY_COLUMNS: &str =
    "id, kind, created_at, expires_at, access_count, max_access, payload";

/// Keys bound per `IN (...)` query, below SQLite's host parameter limit.
const REFERENCE_BATCH: usize = 500;

/// Live at ?now: not past expiry and not out of accesses.
const LIVE_PREDICATE: &str =
    "expires_at > ?2 AND (max_access = 0 OR access_count < max_access)";

/// Identity of an entry that the reaper may reclaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredEntry {
    pub id: String,
    pub storage_key: Option<String>,
}

/// MetadataStore owns every entry record.
///
/// Each call opens its own connection, so readers and writers of different
/// entries never queue behind a process-wide lock. Counter updates are single
/// SQL statements and therefore atomic per entry.
pub struct MetadataStore {
    db_path: PathBuf,
}

impl MetadataStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(
            journal_mode = %mode,
            db = %self.db_path.display(),
            "Opened metadata store"
        );

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                max_access INTEGER NOT NULL DEFAULT 0,
                storage_key TEXT,
                payload TEXT NOT NULL,
                CHECK (expires_at > created_at)
            )",
            [],
        )?;

        // Index for the reaper's time-based scan
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_expires_at ON entries(expires_at)",
            [],
        )?;

        // Index for orphan checks
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_storage_key ON entries(storage_key)",
            [],
        )?;

        Ok(())
    }

    /// Insert a new entry. Fails with `AlreadyExists` if the id is taken and
    /// with `InvalidRequest` if it would not expire after its creation.
    pub fn create(&self, entry: &Entry) -> Result<()> {
        let conn = self.get_conn()?;
        let payload = match &entry.content {
            EntryContent::File(file) => serde_json::to_string(file)?,
            EntryContent::Paste(paste) => serde_json::to_string(paste)?,
        };

        let inserted = conn.execute(
            "INSERT INTO entries (
                id, kind, created_at, expires_at, access_count, max_access, storage_key, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.kind().as_str(),
                entry.created_at.timestamp_millis(),
                entry.expires_at.timestamp_millis(),
                to_sql_count(entry.access_count),
                to_sql_count(entry.max_access),
                entry.storage_key(),
                payload,
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(QuipError::AlreadyExists(entry.id.clone()))
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_CHECK =>
            {
                Err(QuipError::InvalidRequest(
                    "expiry must be after creation".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load an entry regardless of liveness.
    pub fn get(&self, id: &str) -> Result<Option<Entry>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS);

        let row = conn.query_row(&sql, [id], read_row).optional()?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// Atomically count one access and return the updated entry.
    ///
    /// The liveness check is part of the same statement, so concurrent callers
    /// each observe a distinct count and the count never passes `max_access`.
    /// Returns `None` when the entry is absent, of another kind, or not live.
    pub fn increment_access_and_get(
        &self,
        id: &str,
        kind: EntryKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Entry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE entries SET access_count = access_count + 1
             WHERE id = ?1 AND kind = ?3 AND {}
             RETURNING {}",
            LIVE_PREDICATE, ENTRY_COLUMNS
        );

        let row = conn
            .query_row(
                &sql,
                params![id, now.timestamp_millis(), kind.as_str()],
                read_row,
            )
            .optional()?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// Lazily walk every entry that is not live at `now`.
    pub fn list_expired(&self, now: DateTime<Utc>, batch_size: usize) -> ExpiredScan<'_> {
        ExpiredScan {
            store: self,
            now,
            batch_size: batch_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn expired_page(
        &self,
        now: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExpiredEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, storage_key FROM entries
             WHERE id > ?1
               AND (expires_at <= ?2 OR (max_access > 0 AND access_count >= max_access))
             ORDER BY id
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![
                after.unwrap_or(""),
                now.timestamp_millis(),
                i64::try_from(limit).unwrap_or(i64::MAX)
            ],
            |row| {
                Ok(ExpiredEntry {
                    id: row.get(0)?,
                    storage_key: row.get(1)?,
                })
            },
        )?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }

    /// The subset of `storage_keys` that some entry still references.
    ///
    /// Runs on one connection, `REFERENCE_BATCH` keys per query.
    pub fn referenced_storage_keys(&self, storage_keys: &[String]) -> Result<HashSet<String>> {
        let mut referenced = HashSet::new();
        if storage_keys.is_empty() {
            return Ok(referenced);
        }

        let conn = self.get_conn()?;
        for batch in storage_keys.chunks(REFERENCE_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT storage_key FROM entries WHERE storage_key IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(batch), |row| row.get::<_, String>(0))?;
            for row in rows {
                referenced.insert(row?);
            }
        }
        Ok(referenced)
    }

    /// Remove an entry. Removing an absent id is not an error.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM entries WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

/// Paged iterator over non-live entries, `batch_size` rows per query.
///
/// Pages are keyed by id, so deleting yielded entries while iterating is safe
/// and an entry that fails to delete is not revisited within the same scan.
pub struct ExpiredScan<'a> {
    store: &'a MetadataStore,
    now: DateTime<Utc>,
    batch_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<ExpiredEntry>,
    exhausted: bool,
}

impl Iterator for ExpiredScan<'_> {
    type Item = Result<ExpiredEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .store
                .expired_page(self.now, self.cursor.as_deref(), self.batch_size)
            {
                Ok(page) => {
                    if page.len() < self.batch_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some(last.id.clone());
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

struct RawEntry {
    id: String,
    kind: String,
    created_at: i64,
    expires_at: i64,
    access_count: i64,
    max_access: i64,
    payload: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        kind: row.get(1)?,
        created_at: row.get(2)?,
        expires_at: row.get(3)?,
        access_count: row.get(4)?,
        max_access: row.get(5)?,
        payload: row.get(6)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> Result<Entry> {
        let content = match self.kind.parse::<EntryKind>()? {
            EntryKind::File => EntryContent::File(serde_json::from_str::<FileMeta>(&self.payload)?),
            EntryKind::Paste => {
                EntryContent::Paste(serde_json::from_str::<PasteMeta>(&self.payload)?)
            }
        };

        Ok(Entry {
            created_at: from_millis(self.created_at)?,
            expires_at: from_millis(self.expires_at)?,
            access_count: self.access_count.max(0) as u64,
            max_access: self.max_access.max(0) as u64,
            id: self.id,
            content,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QuipError::Internal(format!("timestamp out of range: {}", ms)))
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
