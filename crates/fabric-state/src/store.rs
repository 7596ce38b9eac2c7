//! SQLite read store: normalized memories plus an FTS5 index.
//!
//! Manages the connection and provides:
//! - insert / update / delete / get for memories
//! - sanitized full-text search
//! - entity and edge storage (see `graph.rs`)
//!
//! ## Index consistency
//!
//! Every path that changes `memories.content` calls [`index_write_through`]
//! inside the same `IMMEDIATE` transaction as the row mutation. Deletes call
//! [`index_remove`] the same way. There is no separate sync step.
//!
//! ## Locking
//!
//! Writers take SQLite's reserved lock up front (`BEGIN IMMEDIATE`) and wait
//! at most `lock_timeout` for it; contention surfaces as
//! [`StateError::LockTimeout`]. WAL mode lets readers proceed against the
//! last committed snapshot while a writer is active.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info, instrument};

use crate::error::{Result, StateError};
use crate::records::{
    validate_importance, Memory, MemoryFilter, MemoryUpdate, NewMemory, StoreCounts,
};
use crate::sanitize::fts_query;
use crate::schema::run_migrations;

/// File name of the database inside a data directory.
pub const DB_FILE: &str = "memory_fabric.db";

/// Default bound on waiting for the write lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);

const MEMORY_COLUMNS: &str = "id, content, memory_type, source, importance, created_at, updated_at";

/// Handle to the normalized read model.
pub struct ReadStore {
    conn: Mutex<Option<Connection>>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for ReadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStore")
            .field("closed", &self.is_closed())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl ReadStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        info!(path = %path.display(), "read store opened");
        Self::from_connection(conn, lock_timeout)
    }

    /// Private in-memory database (tests, scratch rebuilds).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, DEFAULT_LOCK_TIMEOUT)
    }

    fn from_connection(conn: Connection, lock_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(lock_timeout)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            lock_timeout,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Release the connection. Later operations fail with `Closed`;
    /// closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let taken = self.conn.lock().take();
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| StateError::from(e))?;
            debug!("read store closed");
        }
        Ok(())
    }

    fn waited_ms(&self) -> u64 {
        self.lock_timeout.as_millis() as u64
    }

    fn stamp_timeout(&self, err: StateError) -> StateError {
        match err {
            StateError::LockTimeout { .. } => StateError::LockTimeout {
                waited_ms: self.waited_ms(),
            },
            other => other,
        }
    }

    /// Run `f` against the open connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StateError::Closed)?;
        f(conn).map_err(|e| self.stamp_timeout(e))
    }

    /// Run `f` inside an `IMMEDIATE` transaction and commit.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StateError::Closed)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StateError::from_sqlite(e, self.waited_ms()))?;
        let out = f(&tx).map_err(|e| self.stamp_timeout(e))?;
        tx.commit()
            .map_err(|e| StateError::from_sqlite(e, self.waited_ms()))?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    /// Insert a memory and its index entry atomically.
    #[instrument(skip(self, memory), fields(memory_id = %memory.id))]
    pub fn insert_memory(&self, memory: &NewMemory) -> Result<String> {
        memory.validate()?;
        let now = Utc::now();
        let created_at = memory.created_at.unwrap_or(now);
        self.write(|tx| {
            if memory_exists(tx, &memory.id)? {
                return Err(StateError::DuplicateId {
                    id: memory.id.clone(),
                });
            }
            tx.execute(
                "INSERT INTO memories (id, content, memory_type, source, importance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    memory.id,
                    memory.content,
                    memory.memory_type,
                    memory.source,
                    memory.importance,
                    created_at.to_rfc3339(),
                    created_at.to_rfc3339(),
                ],
            )?;
            index_write_through(tx, &memory.id, &memory.content)?;
            Ok(memory.id.clone())
        })
    }

    /// Apply a partial update; content changes re-derive the index entry in
    /// the same transaction.
    #[instrument(skip(self, update))]
    pub fn update_memory(&self, id: &str, update: &MemoryUpdate) -> Result<Memory> {
        if let Some(importance) = update.importance {
            validate_importance(importance)?;
        }
        let updated_at = update.updated_at.unwrap_or_else(Utc::now);
        self.write(|tx| {
            let mut memory =
                load_memory(tx, id)?.ok_or_else(|| StateError::not_found("memory", id))?;
            if let Some(ref content) = update.content {
                memory.content = content.clone();
            }
            if let Some(importance) = update.importance {
                memory.importance = importance;
            }
            memory.updated_at = updated_at;
            tx.execute(
                "UPDATE memories SET content = ?2, importance = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    memory.id,
                    memory.content,
                    memory.importance,
                    memory.updated_at.to_rfc3339()
                ],
            )?;
            if update.content.is_some() {
                index_write_through(tx, &memory.id, &memory.content)?;
            }
            Ok(memory)
        })
    }

    /// Delete a memory, its index entry and its entity links.
    #[instrument(skip(self))]
    pub fn delete_memory(&self, id: &str) -> Result<()> {
        self.write(|tx| {
            let removed = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(StateError::not_found("memory", id));
            }
            index_remove(tx, id)?;
            tx.execute(
                "DELETE FROM memory_entities WHERE memory_id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        self.with_conn(|conn| load_memory(conn, id))
    }

    /// Fetch several memories; unknown ids are ignored.
    pub fn get_memories(&self, ids: &[String]) -> Result<Vec<Memory>> {
        self.with_conn(|conn| {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(m) = load_memory(conn, id)? {
                    out.push(m);
                }
            }
            Ok(out)
        })
    }

    /// Full-text search. The raw query is sanitized first; a query with no
    /// searchable tokens returns no rows. Scores are `-bm25` (higher is
    /// better).
    #[instrument(skip(self, filter))]
    pub fn search_memories_fts(
        &self,
        raw_query: &str,
        limit: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<(Memory, f64)>> {
        let Some(expr) = fts_query(raw_query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.content, m.memory_type, m.source, m.importance,
                        m.created_at, m.updated_at, bm25(memories_fts) AS score
                 FROM memories_fts
                 JOIN memories m ON m.id = memories_fts.memory_id
                 WHERE memories_fts MATCH ?1
                   AND (?2 IS NULL OR m.memory_type = ?2)
                   AND (?3 IS NULL OR m.source = ?3)
                 ORDER BY score, m.id
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![expr, filter.memory_type, filter.source, limit as i64],
                |row| {
                    let memory = memory_from_row(row)?;
                    let bm25: f64 = row.get(7)?;
                    Ok((memory, -bm25))
                },
            )?;
            let hits = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            debug!(hits = hits.len(), "fts search");
            Ok(hits)
        })
    }

    /// Memories of one type, most important first.
    pub fn memories_by_type(&self, memory_type: &str, limit: usize) -> Result<Vec<Memory>> {
        self.list_memories(&MemoryFilter::any().with_type(memory_type), limit)
    }

    /// All memories, most important first.
    pub fn all_memories(&self, limit: usize) -> Result<Vec<Memory>> {
        self.list_memories(&MemoryFilter::any(), limit)
    }

    pub fn list_memories(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<Memory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE (?1 IS NULL OR memory_type = ?1)
                   AND (?2 IS NULL OR source = ?2)
                 ORDER BY importance DESC, created_at DESC, id
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![filter.memory_type, filter.source, limit as i64],
                memory_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Contents of every index entry for `id` (consistency check).
    pub fn index_entries_for(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT content FROM memories_fts WHERE memory_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Row counts per table and memories per type.
    pub fn counts(&self) -> Result<StoreCounts> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
                Ok(n as u64)
            };
            let mut counts = StoreCounts {
                memories: count("memories")?,
                entities: count("entities")?,
                edges: count("edges")?,
                links: count("memory_entities")?,
                fts_entries: count("memories_fts")?,
                ..StoreCounts::default()
            };
            let mut stmt = conn.prepare(
                "SELECT memory_type, count(*) FROM memories GROUP BY memory_type ORDER BY memory_type",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (t, n) = row?;
                counts.memories_by_type.insert(t, n as u64);
            }
            Ok(counts)
        })
    }

    /// Remove every row from every table, index included.
    pub fn clear(&self) -> Result<()> {
        self.write(|tx| {
            tx.execute_batch(
                "DELETE FROM memories;
                 DELETE FROM memories_fts;
                 DELETE FROM entities;
                 DELETE FROM edges;
                 DELETE FROM memory_entities;",
            )?;
            Ok(())
        })
    }

    /// Compact the database file.
    pub fn vacuum(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM")?;
            Ok(())
        })
    }
}

/// Replace the index entry for `id` with `content`.
fn index_write_through(tx: &Transaction<'_>, id: &str, content: &str) -> Result<()> {
    index_remove(tx, id)?;
    tx.execute(
        "INSERT INTO memories_fts (memory_id, content) VALUES (?1, ?2)",
        params![id, content],
    )?;
    Ok(())
}

fn index_remove(tx: &Transaction<'_>, id: &str) -> Result<()> {
    tx.execute("DELETE FROM memories_fts WHERE memory_id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn memory_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM memories WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn load_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            memory_from_row,
        )
        .optional()?)
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        memory_type: row.get(2)?,
        source: row.get(3)?,
        importance: row.get(4)?,
        created_at: parse_ts(row, 5)?,
        updated_at: parse_ts(row, 6)?,
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
