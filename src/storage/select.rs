use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use super::{FileStorage, MemoryStorage, StorageBackend, StorageError};

/// Key written and removed again to decide whether the device store is usable.
pub const PROBE_KEY: &str = "persisted-state storage test";

/// Which backend the process should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Device store when it passes the probe, memory otherwise.
    #[default]
    Auto,
    /// Device store only; a failed probe is an error.
    File,
    /// Process memory only.
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown backend `{other}` (expected auto, file or memory)"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// Result of backend selection.
#[derive(Clone)]
pub struct SelectedBackend {
    pub backend: Arc<dyn StorageBackend>,
    /// True when the device store was requested but memory is in use.
    pub fell_back: bool,
}

impl fmt::Debug for SelectedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedBackend")
            .field("backend", &self.backend.name())
            .field("fell_back", &self.fell_back)
            .finish()
    }
}

/// Choose the storage backend for this process.
///
/// The device store is opened under `directory` and probed with a trivial
/// write. Under [`BackendKind::Auto`] any failure falls back to
/// [`MemoryStorage`] with a warning; under [`BackendKind::File`] it is
/// returned as [`StorageError::Unavailable`].
pub fn select_backend(
    kind: BackendKind,
    directory: &Path,
) -> Result<SelectedBackend, StorageError> {
    if kind == BackendKind::Memory {
        return Ok(SelectedBackend {
            backend: Arc::new(MemoryStorage::new()),
            fell_back: false,
        });
    }

    match open_device_store(directory) {
        Ok(storage) => {
            info!(
                backend = storage.name(),
                directory = %directory.display(),
                "Storage backend selected"
            );
            Ok(SelectedBackend {
                backend: Arc::new(storage),
                fell_back: false,
            })
        }
        Err(error) if kind == BackendKind::Auto => {
            warn!(
                directory = %directory.display(),
                error = %error,
                "storage probe failed, persistence will fall back to memory"
            );
            Ok(SelectedBackend {
                backend: Arc::new(MemoryStorage::new()),
                fell_back: true,
            })
        }
        Err(error) => Err(error),
    }
}

fn open_device_store(directory: &Path) -> Result<FileStorage, StorageError> {
    let storage = FileStorage::new(directory.to_path_buf()).map_err(|err| {
        StorageError::unavailable(format!(
            "cannot open `{}`: {err}",
            directory.display()
        ))
    })?;
    storage.probe(PROBE_KEY)?;
    Ok(storage)
}
