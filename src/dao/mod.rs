/// Scoring backend client abstraction and implementations.
pub mod backend;
/// Device-local key/value storage shared between sessions.
pub mod local_store;
/// Records persisted in local storage.
pub mod models;
/// Storage error types.
pub mod storage;
