//! Object storage seam. The coordinator only ever asks for bytes by key,
//! so tests and the CLI can plug in a local directory while a deployment
//! points at a blob store.

use std::path::{Path, PathBuf};

use crate::error::SessionError;

pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, SessionError>;
}

/// Object store over a local directory. Absolute keys are used as-is,
/// relative keys resolve under the root.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let path = Path::new(key);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl ObjectStore for LocalDirStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, SessionError> {
        std::fs::read(self.resolve(key)).map_err(|e| SessionError::Storage {
            key: key.to_string(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn relative_and_absolute_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), b"data").unwrap();

        let store = LocalDirStore::new(dir.path());
        assert_eq!(store.get("a.csv").unwrap(), b"data");

        let absolute = dir.path().join("a.csv");
        assert_eq!(store.get(absolute.to_str().unwrap()).unwrap(), b"data");
    }

    #[test]
    fn missing_key_is_storage_error() {
        let store = LocalDirStore::new("/nonexistent");
        assert!(matches!(
            store.get("nope.csv").unwrap_err(),
            SessionError::Storage { .. }
        ));
    }
}
