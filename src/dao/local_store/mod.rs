mod file;
mod memory;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;

use crate::dao::storage::StorageResult;

/// Device-local key/value storage holding JSON documents.
///
/// Every open session on the device profile sees the same keys, which makes this the shared
/// medium for the offline queue and the session lock.
pub trait LocalStore: Send + Sync {
    /// Read the raw value of `key`, `None` when absent.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Delete `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}
