//! Local Store: durable string-keyed persistence
//!
//! The orchestrator reads and writes the dataset, the migration state and the
//! progress checkpoint through [`LocalStore`]. Typed values are stored as JSON.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tagsync_common::Result;

/// Store keys
pub mod keys {
    pub const DATASET: &str = "dataset";
    pub const MIGRATION_STATE: &str = "migration_state";
    /// Absent means no migration is in progress
    pub const MIGRATION_PROGRESS: &str = "migration_progress";
    pub const TRACK_CACHE: &str = "track_cache";
}

/// Durable key/value persistence surface
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value
pub async fn load_json<T>(store: &dyn LocalStore, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn save_json<T>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MigrationState, TrackRecord};

    #[tokio::test]
    async fn test_json_helpers_round_trip_through_store() {
        let store = MemoryStore::new();
        let mut state = MigrationState::default();
        state.version = "0.1.0".to_string();
        state.mark_complete("normalize_tags");

        save_json(&store, keys::MIGRATION_STATE, &state).await.unwrap();
        let loaded: Option<MigrationState> = load_json(&store, keys::MIGRATION_STATE).await.unwrap();
        assert_eq!(loaded, Some(state));

        let missing: Option<MigrationState> = load_json(&store, "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_serialization_error() {
        let store = MemoryStore::new();
        store.set(keys::DATASET, "{not json").await.unwrap();

        let result: Result<Option<TrackRecord>> = load_json(&store, keys::DATASET).await;
        assert!(matches!(result, Err(tagsync_common::Error::Serialization(_))));
    }
}
