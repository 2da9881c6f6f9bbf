use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::LocalStore;
use crate::dao::storage::{StorageError, StorageResult};

/// Store keeping one JSON file per key inside a data directory.
///
/// Writes go through a temporary file and a rename so readers in other processes never observe
/// a partially written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| {
            StorageError::unavailable(format!("cannot create `{}`", dir.display()), source)
        })?;
        Ok(Self { dir })
    }

    /// Directory holding one file per key.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::unavailable(
                format!("cannot read `{}`", path.display()),
                err,
            )),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|source| {
            StorageError::unavailable(format!("cannot write `{}`", tmp.display()), source)
        })?;
        fs::rename(&tmp, &path).map_err(|source| {
            StorageError::unavailable(format!("cannot replace `{}`", path.display()), source)
        })?;
        debug!(key, "local record written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::unavailable(
                format!("cannot remove `{}`", path.display()),
                err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn values_survive_reopening_the_directory() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("scoring_session_lock:abc", "{\"a\":1}").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("scoring_session_lock:abc").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[test]
    fn missing_keys_read_as_none_and_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("offline_score_queue").unwrap(), None);
        store.remove("offline_score_queue").unwrap();

        store.set("offline_score_queue", "[]").unwrap();
        store.remove("offline_score_queue").unwrap();
        assert_eq!(store.get("offline_score_queue").unwrap(), None);
    }
}
