//! Persisted state: a subscribable in-memory cache kept in sync with a
//! key-value storage backend.
//!
//! The [`PersistenceEngine`] is the core. It loads each key lazily, memoizes
//! it, fans changes out to subscribers synchronously and reconciles writes
//! that race an in-flight load. [`ObjectState`] layers JSON values on top and
//! [`PersistedState`] is a reactive handle over a single key.

pub mod application;
pub mod binding;
pub mod cache;
pub mod config;
pub mod infra;
pub mod notify;
pub mod object;
pub mod storage;

pub use binding::{PersistedState, StateView};
pub use cache::{PersistenceEngine, SlotRead, SlotState, Subscription};
pub use object::{DecodeFailurePolicy, ObjectState, ObjectStateError};
pub use storage::{StorageBackend, StorageError, StorageOp};
