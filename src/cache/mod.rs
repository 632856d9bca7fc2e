//! Persistence cache
//!
//! Keeps one slot per key in memory in front of a [`StorageBackend`] and fans
//! out value changes to per-key subscribers:
//!
//! - **Slots**: `Unloaded`, `Pending(LoadId)` while a backend read is in
//!   flight, or `Resolved(Option<String>)`.
//! - **Supersession**: a write landing while a load is pending wins; the
//!   load's result is discarded when it settles.
//! - **External changes**: with a [`ChangeNotifier`] configured, writes made
//!   by sibling contexts update the slot and reach subscribers without being
//!   persisted again.
//!
//! [`StorageBackend`]: crate::storage::StorageBackend
//! [`ChangeNotifier`]: crate::notify::ChangeNotifier

mod delivery;
mod engine;
pub(crate) mod lock;
pub mod metrics;
mod registry;
mod sequencer;
mod store;

pub use engine::{EngineBuilder, PendingLoad, PersistenceEngine, SlotRead, Subscription};
pub use registry::{SubscriberCallback, SubscriberId};
pub use store::{LoadId, SlotState};
