//! SQLite-backed memory store

use super::record::{Category, MemoryId, MemoryRecord};
use super::store::{sort_newest_first, validate_content, MemoryStore};
use crate::{MemoriaError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// `AUTOINCREMENT` keeps ids unique for the lifetime of the database file,
/// even across `delete_all`.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
";

/// Durable single-file memory store
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!("opened memory database at {}", path.display());
        Ok(store)
    }

    /// Throwaway database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoriaError::Store("memory database lock poisoned".to_string()))
    }
}

/// Timestamps are written as RFC 3339 UTC. Reads also accept rusqlite's
/// space-separated form and SQLite's `CURRENT_TIMESTAMP`.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(MemoryId, String, String, DateTime<Utc>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn list(&self, category: Option<Category>) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn()?;
        let rows = match category {
            Some(category) => {
                let mut stmt = conn.prepare(
                    "SELECT id, category, content, created_at FROM memories
                     WHERE category = ?1 OR (?1 = 'note' AND category = 'memory')
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map(params![category.as_str()], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, category, content, created_at FROM memories
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map([], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for (id, category, content, created_at) in rows {
            // Older databases used `memory` for notes
            let Some(category) = Category::from_model_label(&category) else {
                warn!("skipping memory id={} with unknown category {:?}", id, category);
                continue;
            };
            records.push(MemoryRecord {
                id,
                category,
                content,
                created_at,
            });
        }
        // Legacy rows may use a different timestamp layout than new ones.
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn add(&self, category: Category, content: &str) -> Result<MemoryId> {
        validate_content(content)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memories (category, content, created_at) VALUES (?1, ?2, ?3)",
            params![category.as_str(), content, timestamp(Utc::now())],
        )?;
        let id = conn.last_insert_rowid();
        debug!("added memory id={} category={}", id, category);
        Ok(id)
    }

    async fn update(&self, id: MemoryId, content: &str, category: Category) -> Result<()> {
        validate_content(content)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE memories SET content = ?1, category = ?2 WHERE id = ?3",
            params![content, category.as_str(), id],
        )?;
        if changed == 0 {
            debug!("update of missing memory id={} ignored", id);
        }
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM memories", [])?;
        info!("cleared {} memories", removed);
        Ok(())
    }
}
