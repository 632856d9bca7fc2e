//! Per-key ordering of backend writes.
//!
//! Every value committed to a slot gets a version. Persisting it first claims
//! a ticket: the claim fails when a newer value was committed in the meantime
//! (that newer value persists itself), otherwise the ticket chains the backend
//! operation behind the previous one for the same key. The chain owns the
//! operations, so awaiting any write of a key also runs the earlier ones.

use std::collections::HashMap;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::storage::{StorageError, StorageOp};

type Tail = Shared<BoxFuture<'static, Result<(), StorageError>>>;

#[derive(Default)]
struct KeyWrites {
    version: u64,
    tail: Option<Tail>,
}

#[derive(Default)]
pub(crate) struct WriteSequencer {
    keys: HashMap<String, KeyWrites>,
}

impl WriteSequencer {
    /// Record that `key` holds a new value and return that value's version.
    pub(crate) fn bump(&mut self, key: &str) -> u64 {
        let entry = self.keys.entry(key.to_string()).or_default();
        entry.version += 1;
        entry.version
    }

    /// Take the next place in `key`'s write queue, or `None` when `version`
    /// is no longer the latest value.
    pub(crate) fn claim(&mut self, key: &str, version: u64) -> Option<WriteTicket> {
        let entry = self.keys.get_mut(key)?;
        if entry.version != version {
            return None;
        }

        let previous = entry.tail.take().filter(|tail| tail.peek().is_none());
        let (submit, submitted) = oneshot::channel::<StorageOp<()>>();
        let tail = async move {
            if let Some(previous) = previous {
                // An earlier failure was already reported to its own caller.
                let _ = previous.await;
            }
            match submitted.await {
                Ok(op) => op.await,
                Err(_) => Ok(()),
            }
        }
        .boxed()
        .shared();
        entry.tail = Some(tail.clone());

        Some(WriteTicket { tail, submit })
    }
}

/// A claimed place in a key's write queue.
pub(crate) struct WriteTicket {
    tail: Tail,
    submit: oneshot::Sender<StorageOp<()>>,
}

impl WriteTicket {
    /// Hold `op` back until the previous write of the key has finished.
    ///
    /// Settled operations already ran and pass through. Dropping the ticket
    /// unblocks the writes queued behind it.
    pub(crate) fn sequence(self, op: StorageOp<()>) -> StorageOp<()> {
        match op {
            StorageOp::Ready(result) => {
                let _ = self.submit.send(StorageOp::ready(()));
                StorageOp::Ready(result)
            }
            pending => {
                let _ = self.submit.send(pending);
                StorageOp::pending(self.tail)
            }
        }
    }
}
