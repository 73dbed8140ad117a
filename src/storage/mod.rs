//! Asynchronous key-value persistence.
//!
//! Every component above this layer sees the store as an opaque map from
//! string keys to JSON values. Two backends are provided:
//! - `MemoryStore`: process-local, used by tests and ephemeral runs
//! - `SqliteStore`: a single `kv` table in the application database

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::ApiError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const KEY_TAB_CONTEXTS: &str = "tabChatContexts";
pub const KEY_PROMPT_TEMPLATES: &str = "promptTemplates";
pub const KEY_SETTINGS: &str = "settings";
pub const KEY_CURRENT_PAGE: &str = "currentPage";
pub const KEY_LAST_SELECTION: &str = "lastSelection";
pub const KEY_MEMORY_CHUNKS: &str = "memoryChunks";

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, ApiError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), ApiError>;

    async fn remove(&self, key: &str) -> Result<(), ApiError>;

    async fn clear(&self) -> Result<(), ApiError>;
}

/// Reads `key` and decodes it.
///
/// A value that no longer matches `T` is logged and treated as absent, so a
/// corrupt entry degrades to "nothing stored" instead of failing every caller.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, ApiError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value::<T>(raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!("Discarding malformed value under '{}': {}", key, err);
            Ok(None)
        }
    }
}

pub async fn save<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), ApiError> {
    let raw = serde_json::to_value(value).map_err(ApiError::internal)?;
    store.set(key, raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn typed_round_trip_through_store() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "a".to_string(),
            count: 2,
        };
        save(&store, "sample", &sample).await.expect("save");

        let loaded: Option<Sample> = load(&store, "sample").await.expect("load");
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn malformed_value_loads_as_none() {
        let store = MemoryStore::new();
        store
            .set("sample", json!({ "name": 5 }))
            .await
            .expect("set");

        let loaded: Option<Sample> = load(&store, "sample").await.expect("load");
        assert!(loaded.is_none());
    }
}
