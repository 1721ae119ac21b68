//! Pending-request table: in-flight chunk offset -> one-shot delivery slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

use crate::RemoteFileError;

/// Maps each in-flight offset of one file to the waiter expecting it.
///
/// At most one slot exists per offset. Every slot is removed exactly once:
/// by [`fulfil`](Self::fulfil), by [`abandon_all`](Self::abandon_all), or
/// when its [`PendingSlot`] guard is dropped.
pub struct PendingTable {
    inner: Mutex<Slots>,
}

struct Slots {
    waiting: HashMap<u64, Waiter>,
    next_ticket: u64,
    closed: bool,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Vec<u8>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                waiting: HashMap::new(),
                next_ticket: 0,
                closed: false,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a slot for `offset`.
    ///
    /// Fails with [`RemoteFileError::DuplicateRequest`] if a slot is already
    /// open there, or [`RemoteFileError::SessionClosed`] once the table has
    /// been abandoned.
    pub fn open(&self, offset: u64) -> Result<PendingSlot<'_>, RemoteFileError> {
        let mut slots = self.slots();
        if slots.closed {
            return Err(RemoteFileError::SessionClosed);
        }
        if slots.waiting.contains_key(&offset) {
            return Err(RemoteFileError::DuplicateRequest(offset));
        }

        let ticket = slots.next_ticket;
        slots.next_ticket += 1;
        let (tx, rx) = oneshot::channel();
        slots.waiting.insert(offset, Waiter { ticket, tx });
        trace!(offset, ticket, "pending slot opened");

        Ok(PendingSlot {
            table: self,
            offset,
            ticket,
            rx,
        })
    }

    /// Hands `payload` to the waiter at `offset`.
    ///
    /// Returns `false` when nobody is waiting (late, duplicate or forged
    /// response); the payload is dropped.
    pub fn fulfil(&self, offset: u64, payload: Vec<u8>) -> bool {
        let waiter = self.slots().waiting.remove(&offset);
        match waiter {
            Some(w) => w.tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Wakes every waiter with [`RemoteFileError::SessionClosed`] and
    /// refuses new slots from now on.
    pub fn abandon_all(&self) -> usize {
        let mut slots = self.slots();
        slots.closed = true;
        let n = slots.waiting.len();
        // Dropping the senders wakes the receivers with an error.
        slots.waiting.clear();
        n
    }

    /// Number of open slots.
    pub fn len(&self) -> usize {
        self.slots().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`abandon_all`](Self::abandon_all) has run.
    pub fn is_closed(&self) -> bool {
        self.slots().closed
    }

    fn release(&self, offset: u64, ticket: u64) {
        let mut slots = self.slots();
        // A fulfilled slot may already have been replaced by a newer request
        // at the same offset; only remove our own.
        if slots
            .waiting
            .get(&offset)
            .is_some_and(|w| w.ticket == ticket)
        {
            slots.waiting.remove(&offset);
            trace!(offset, ticket, "pending slot released");
        }
    }
}

/// Guard for one open slot. Dropping it releases the slot.
pub struct PendingSlot<'a> {
    table: &'a PendingTable,
    offset: u64,
    ticket: u64,
    rx: oneshot::Receiver<Vec<u8>>,
}

impl PendingSlot<'_> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Waits for the payload.
    ///
    /// Resolves to [`RemoteFileError::SessionClosed`] if the slot is
    /// abandoned before a payload arrives.
    pub async fn wait(&mut self) -> Result<Vec<u8>, RemoteFileError> {
        (&mut self.rx)
            .await
            .map_err(|_| RemoteFileError::SessionClosed)
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.table.release(self.offset, self.ticket);
    }
}
