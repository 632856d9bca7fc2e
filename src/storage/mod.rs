//! Storage capability consumed by the persistence engine.
//!
//! A backend answers `get_item`, `set_item` and `remove_item` either
//! immediately ([`StorageOp::Ready`]) or with a future
//! ([`StorageOp::Pending`]). The engine never assumes which one it gets.
//!
//! Two backends ship with the crate:
//!
//! - [`FileStorage`]: one file per key under a directory, asynchronous.
//! - [`MemoryStorage`]: process-local map, synchronous. Used as the fallback
//!   when the device store cannot be used.
//!
//! [`select_backend`] makes the probe-and-fallback decision once at startup.

mod file;
mod memory;
mod select;

use std::fmt;

use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use select::{BackendKind, PROBE_KEY, SelectedBackend, select_backend};

/// Errors reported by a storage backend.
///
/// `Clone` because a single pending load may be awaited by several readers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage io error for `{key}`: {message}")]
    Io { key: String, message: String },
    #[error("storage backend unavailable: {message}")]
    Unavailable { message: String },
    #[error("storage task failed: {message}")]
    Task { message: String },
}

impl StorageError {
    pub fn io(key: impl Into<String>, error: &std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            message: error.to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

/// Outcome of a storage call: already settled, or still in flight.
pub enum StorageOp<T> {
    Ready(Result<T, StorageError>),
    Pending(BoxFuture<'static, Result<T, StorageError>>),
}

impl<T: Send + 'static> StorageOp<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn failed(error: StorageError) -> Self {
        Self::Ready(Err(error))
    }

    pub fn pending<F>(operation: F) -> Self
    where
        F: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        Self::Pending(operation.boxed())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns the settled result without waiting, or `None` while pending.
    pub fn now(self) -> Option<Result<T, StorageError>> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Pending(_) => None,
        }
    }
}

impl<T: Send + 'static> std::future::IntoFuture for StorageOp<T> {
    type Output = Result<T, StorageError>;
    type IntoFuture = BoxFuture<'static, Result<T, StorageError>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(result) => future::ready(result).boxed(),
            Self::Pending(operation) => operation,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StorageOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Key-value capability backing the persistence engine.
///
/// `get_item` is called with the engine's slot lock held so that a key is
/// fetched at most once; implementations must not call back into the engine
/// from it. Returned futures are lazy and may be polled on any thread.
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    fn get_item(&self, key: &str) -> StorageOp<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StorageOp<()>;

    fn remove_item(&self, key: &str) -> StorageOp<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_and_pending_ops_await_to_their_results() {
        let ready: StorageOp<u8> = StorageOp::ready(7);
        assert!(!ready.is_pending());
        assert_eq!(ready.await, Ok(7));

        let pending: StorageOp<u8> = StorageOp::pending(async { Ok(9) });
        assert!(pending.is_pending());
        assert_eq!(pending.await, Ok(9));

        let failed: StorageOp<u8> = StorageOp::failed(StorageError::unavailable("gone"));
        assert_eq!(
            failed.await,
            Err(StorageError::Unavailable {
                message: "gone".to_string()
            })
        );
    }

    #[test]
    fn now_only_yields_settled_results() {
        assert_eq!(StorageOp::ready(1_u8).now(), Some(Ok(1)));
        assert!(StorageOp::<u8>::pending(async { Ok(1) }).now().is_none());
    }

    #[test]
    fn io_error_mentions_key() {
        let error = StorageError::io(
            "prefs",
            &std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error.to_string(), "storage io error for `prefs`: denied");
    }
}
