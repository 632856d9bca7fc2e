use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{StorageBackend, StorageError, StorageOp};

const VALUE_EXTENSION: &str = "val";

/// Device store keeping one file per key under a root directory.
///
/// File names are the hex encoding of the key, so any string is a valid key.
/// Writes go to a temporary file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open storage rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Attempt a trivial synchronous write and removal of `key`.
    pub fn probe(&self, key: &str) -> Result<(), StorageError> {
        let path = self.value_path(key);
        std::fs::write(&path, "test").map_err(|err| StorageError::io(key, &err))?;
        std::fs::remove_file(&path).map_err(|err| StorageError::io(key, &err))
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{VALUE_EXTENSION}", hex::encode(key.as_bytes())))
    }
}

impl StorageBackend for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        let path = self.value_path(key);
        let key = key.to_string();
        StorageOp::pending(async move {
            match fs::read_to_string(&path).await {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(StorageError::io(key, &err)),
            }
        })
    }

    fn set_item(&self, key: &str, value: &str) -> StorageOp<()> {
        let path = self.value_path(key);
        let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let key = key.to_string();
        let value = value.to_string();
        StorageOp::pending(async move {
            fs::write(&staging, value.as_bytes())
                .await
                .map_err(|err| StorageError::io(&key, &err))?;
            if let Err(err) = fs::rename(&staging, &path).await {
                let _ = fs::remove_file(&staging).await;
                return Err(StorageError::io(key, &err));
            }
            debug!(key = %key, path = %path.display(), "value persisted");
            Ok(())
        })
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        let path = self.value_path(key);
        let key = key.to_string();
        StorageOp::pending(async move {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StorageError::io(key, &err)),
            }
        })
    }
}
