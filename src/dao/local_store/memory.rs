use dashmap::DashMap;

use super::LocalStore;
use crate::dao::storage::StorageResult;

/// Process-local store, used for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.get(key).map(|value| value.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.remove(key);
        Ok(())
    }
}
