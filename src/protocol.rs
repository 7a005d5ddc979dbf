//! Resource/tool capability surface over a memory store
//!
//! Exposes the store the way a context-protocol server would: read-only
//! **resources** addressed by URI, and mutating **tools** called by name with
//! JSON arguments. `CapabilityStore` goes the other way and implements
//! `MemoryStore` purely through this surface, so anything written against
//! `MemoryStore` runs unchanged over either access style.

use crate::memory::{validate_content, Category, MemoryId, MemoryRecord, MemoryStore};
use crate::{MemoriaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Resource URIs
pub mod resources {
    /// Memories grouped by category
    pub const ACTIVE: &str = "memories://active";
    /// Flat list; `memories://all/<category>` filters
    pub const ALL: &str = "memories://all";
}

/// Tool names
pub mod tools {
    pub const ADD_MEMORY: &str = "add_memory";
    pub const DELETE_MEMORY: &str = "delete_memory";
    pub const UPDATE_MEMORY: &str = "update_memory";
    /// Administrative
    pub const DELETE_ALL: &str = "delete_all";
}

#[derive(Debug, Deserialize)]
struct AddArgs {
    category: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    id: MemoryId,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    id: MemoryId,
    content: String,
    category: String,
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| MemoriaError::InvalidArguments(format!("{tool}: {e}")))
}

fn success() -> Value {
    json!({ "status": "success" })
}

/// Capability server wrapping any `MemoryStore`
pub struct MemoryServer<S: MemoryStore> {
    store: Arc<S>,
}

impl<S: MemoryStore> MemoryServer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn name(&self) -> &'static str {
        "Memoria Memory Server"
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        debug!("read_resource {}", uri);
        if uri == resources::ACTIVE {
            let memories = self.store.list_all().await?;
            let mut grouped = serde_json::Map::new();
            for category in Category::ALL {
                let items: Vec<&MemoryRecord> =
                    memories.iter().filter(|m| m.category == category).collect();
                grouped.insert(category.plural().to_string(), serde_json::to_value(items)?);
            }
            return Ok(Value::Object(grouped));
        }

        if let Some(rest) = uri.strip_prefix(resources::ALL) {
            let category = match rest.strip_prefix('/') {
                Some(label) => Some(label.parse::<Category>()?),
                None if rest.is_empty() => None,
                None => return Err(MemoriaError::UnknownResource(uri.to_string())),
            };
            let memories = self.store.list(category).await?;
            return Ok(serde_json::to_value(memories)?);
        }

        Err(MemoriaError::UnknownResource(uri.to_string()))
    }

    /// Call a tool by name. Arguments are validated before the store is touched.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        debug!("call_tool {}", name);
        match name {
            tools::ADD_MEMORY => {
                let args: AddArgs = parse_args(name, arguments)?;
                let category = args.category.parse::<Category>()?;
                validate_content(&args.content)?;
                let id = self.store.add(category, &args.content).await?;
                Ok(json!({ "id": id }))
            }
            tools::DELETE_MEMORY => {
                let args: DeleteArgs = parse_args(name, arguments)?;
                self.store.delete(args.id).await?;
                Ok(success())
            }
            tools::UPDATE_MEMORY => {
                let args: UpdateArgs = parse_args(name, arguments)?;
                let category = args.category.parse::<Category>()?;
                validate_content(&args.content)?;
                self.store.update(args.id, &args.content, category).await?;
                Ok(success())
            }
            tools::DELETE_ALL => {
                self.store.delete_all().await?;
                Ok(success())
            }
            other => Err(MemoriaError::UnknownTool(other.to_string())),
        }
    }
}

/// `MemoryStore` that routes every operation through a `MemoryServer`.
pub struct CapabilityStore<S: MemoryStore> {
    server: MemoryServer<S>,
}

impl<S: MemoryStore> CapabilityStore<S> {
    pub fn new(server: MemoryServer<S>) -> Self {
        Self { server }
    }

    pub fn over(store: Arc<S>) -> Self {
        Self::new(MemoryServer::new(store))
    }
}

#[async_trait]
impl<S: MemoryStore + 'static> MemoryStore for CapabilityStore<S> {
    async fn list(&self, category: Option<Category>) -> Result<Vec<MemoryRecord>> {
        let uri = match category {
            Some(category) => format!("{}/{}", resources::ALL, category),
            None => resources::ALL.to_string(),
        };
        let value = self.server.read_resource(&uri).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn add(&self, category: Category, content: &str) -> Result<MemoryId> {
        let value = self
            .server
            .call_tool(
                tools::ADD_MEMORY,
                json!({ "category": category.as_str(), "content": content }),
            )
            .await?;
        value
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| MemoriaError::Store("add_memory returned no id".to_string()))
    }

    async fn update(&self, id: MemoryId, content: &str, category: Category) -> Result<()> {
        self.server
            .call_tool(
                tools::UPDATE_MEMORY,
                json!({ "id": id, "content": content, "category": category.as_str() }),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<()> {
        self.server
            .call_tool(tools::DELETE_MEMORY, json!({ "id": id }))
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.server.call_tool(tools::DELETE_ALL, json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn server() -> MemoryServer<InMemoryStore> {
        MemoryServer::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_active_resource_groups_by_category() {
        let server = server();
        server
            .call_tool(tools::ADD_MEMORY, json!({"category": "goal", "content": "run a marathon"}))
            .await
            .unwrap();
        server
            .call_tool(tools::ADD_MEMORY, json!({"category": "note", "content": "has two cats"}))
            .await
            .unwrap();

        let active = server.read_resource(resources::ACTIVE).await.unwrap();
        assert_eq!(active["goals"][0]["content"], "run a marathon");
        assert_eq!(active["notes"][0]["content"], "has two cats");
        assert_eq!(active["attributes"], json!([]));
        assert_eq!(active["requests"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_category_rejected_before_store() {
        let server = server();
        let err = server
            .call_tool(tools::ADD_MEMORY, json!({"category": "hobby", "content": "chess"}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoriaError::InvalidCategory(_)));

        let all = server.read_resource(resources::ALL).await.unwrap();
        assert_eq!(all, json!([]));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_resource() {
        let server = server();
        assert!(matches!(
            server.call_tool("drop_table", json!({})).await.unwrap_err(),
            MemoriaError::UnknownTool(_)
        ));
        assert!(matches!(
            server.read_resource("memories://recent").await.unwrap_err(),
            MemoriaError::UnknownResource(_)
        ));
        assert!(matches!(
            server.read_resource("memories://allx").await.unwrap_err(),
            MemoriaError::UnknownResource(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_arguments_reported() {
        let server = server();
        let err = server
            .call_tool(tools::UPDATE_MEMORY, json!({"id": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoriaError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_capability_store_matches_direct_store() {
        let direct = Arc::new(InMemoryStore::new());
        let store = CapabilityStore::over(direct.clone());

        let id = store.add(Category::Attribute, "user likes coffee").await.unwrap();
        store.add(Category::Goal, "learn Spanish").await.unwrap();
        store.update(id, "likes coffee", Category::Attribute).await.unwrap();

        let via_capabilities = store.list_by_category(Category::Attribute).await.unwrap();
        let via_direct = direct.list_by_category(Category::Attribute).await.unwrap();
        assert_eq!(via_capabilities, via_direct);
        assert_eq!(via_capabilities[0].content, "likes coffee");

        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert_eq!(direct.list_all().await.unwrap().len(), 1);

        store.delete_all().await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
