//! Correlation of in-flight calls with their responses.
//!
//! A caller registers its call id before the request leaves, so a reply that
//! races ahead of the caller still finds its slot. The session loop resolves
//! entries; resolving removes the entry, which makes a second resolution of
//! the same id a miss rather than a double delivery.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::rpc::envelope::Reply;

struct PendingCall {
    slot: SyncSender<Reply>,
    deadline: Instant,
}

/// Outcome of [`CorrelationTable::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// handed to the waiting caller
    Delivered,
    /// no entry: late, duplicate, or unknown id
    Missing,
    /// entry existed but the caller already stopped waiting
    Abandoned,
}

/// Receiving end of one call's response.
pub struct ResponseSlot {
    receiver: Receiver<Reply>,
}

impl ResponseSlot {
    /// Block for the reply.
    ///
    /// `None` on timeout, or when the entry was dropped without a reply
    /// (client closed, entry swept).
    pub fn wait(&self, timeout: Duration) -> Option<Reply> {
        match self.receiver.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Map of call id to response slot
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the slot for `call_id`. Must happen before the request is sent.
    pub fn register(&self, call_id: &str, deadline: Instant) -> ResponseSlot {
        let (slot, receiver) = mpsc::sync_channel(1);
        let previous = self
            .lock()
            .insert(call_id.to_owned(), PendingCall { slot, deadline });
        if previous.is_some() {
            log::warn!("Call id {call_id} registered twice, previous waiter detached");
        }
        ResponseSlot { receiver }
    }

    pub fn resolve(&self, call_id: &str, reply: Reply) -> Resolution {
        let Some(call) = self.lock().remove(call_id) else {
            return Resolution::Missing;
        };

        // capacity 1 and a single send per entry: only a dropped receiver can fail
        match call.slot.try_send(reply) {
            Ok(()) => Resolution::Delivered,
            Err(_) => Resolution::Abandoned,
        }
    }

    /// Remove an entry the caller gave up on. Returns whether it was present.
    pub fn unregister(&self, call_id: &str) -> bool {
        self.lock().remove(call_id).is_some()
    }

    /// Drop entries whose deadline is before `now`.
    ///
    /// Their callers, if still around, wake up as if timed out.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, call| call.deadline >= now);
        before - pending.len()
    }

    /// Drop every entry, waking all waiters.
    pub fn clear(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
