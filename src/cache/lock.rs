//! Poison recovery for the crate's locks.
//!
//! Subscriber callbacks are user code. A panic in one must not wedge every
//! later read of the cache, so a poisoned guard is taken over and the event
//! logged with the lock's owner and the operation that found it.

use std::sync::LockResult;

use tracing::warn;

pub(crate) trait Recover<G> {
    fn recover(self, owner: &'static str, op: &'static str) -> G;
}

impl<G> Recover<G> for LockResult<G> {
    fn recover(self, owner: &'static str, op: &'static str) -> G {
        self.unwrap_or_else(|poisoned| {
            warn!(
                owner,
                op,
                result = "poisoned_recovered",
                "Lock poisoned by a panic; continuing with its last state"
            );
            poisoned.into_inner()
        })
    }
}
