//! Memory store abstraction and the in-process implementation

use super::record::{Category, MemoryId, MemoryRecord};
use crate::{MemoriaError, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
/// Authoritative collection of memory records.
///
/// Every mutation is a single-record operation that is durable once the call
/// returns. Deleting or updating an id that no longer exists is a no-op.
pub trait MemoryStore: Send + Sync {
    /// Records ordered newest first, optionally restricted to one category.
    async fn list(&self, category: Option<Category>) -> Result<Vec<MemoryRecord>>;

    /// Insert a record and return its new id.
    async fn add(&self, category: Category, content: &str) -> Result<MemoryId>;

    /// Replace content and category in place. `created_at` is kept.
    async fn update(&self, id: MemoryId, content: &str, category: Category) -> Result<()>;

    async fn delete(&self, id: MemoryId) -> Result<()>;

    /// Administrative bulk clear.
    async fn delete_all(&self) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<MemoryRecord>> {
        self.list(None).await
    }

    async fn list_by_category(&self, category: Category) -> Result<Vec<MemoryRecord>> {
        self.list(Some(category)).await
    }
}

/// Reject empty content before it reaches any backend.
pub(crate) fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(MemoriaError::InvalidArguments(
            "memory content must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Newest first, id as tie-breaker
pub(crate) fn sort_newest_first(records: &mut [MemoryRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Process-local store. Used by tests and as a scratch backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<MemoryRecord>,
    last_id: MemoryId,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with fixed records (ids and timestamps kept as given).
    pub fn with_records(records: Vec<MemoryRecord>) -> Self {
        let last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            inner: RwLock::new(Inner { records, last_id }),
        }
    }

    /// Look up a single record by id.
    pub async fn get(&self, id: MemoryId) -> Option<MemoryRecord> {
        let inner = self.inner.read().await;
        inner.records.iter().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn list(&self, category: Option<Category>) -> Result<Vec<MemoryRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<MemoryRecord> = inner
            .records
            .iter()
            .filter(|r| category.map_or(true, |c| r.category == c))
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn add(&self, category: Category, content: &str) -> Result<MemoryId> {
        validate_content(content)?;
        let mut inner = self.inner.write().await;
        inner.last_id += 1;
        let id = inner.last_id;
        inner.records.push(MemoryRecord {
            id,
            category,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        debug!("added memory id={} category={}", id, category);
        Ok(id)
    }

    async fn update(&self, id: MemoryId, content: &str, category: Category) -> Result<()> {
        validate_content(content)?;
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.content = content.to_string();
            record.category = category;
        } else {
            debug!("update of missing memory id={} ignored", id);
        }
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.records.retain(|r| r.id != id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        Ok(())
    }
}
