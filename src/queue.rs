//! FIFO of callers waiting for admission.

use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Identifies one queued request; used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// One caller's pending permission to proceed. Admitting it consumes it.
#[derive(Debug)]
pub struct Waiter {
    id: WaiterId,
    grant: oneshot::Sender<()>,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// The caller dropped its end and can no longer be admitted.
    pub fn is_abandoned(&self) -> bool {
        self.grant.is_closed()
    }

    /// Resolve the caller's admission. Returns `false` if nobody was listening.
    pub fn admit(self) -> bool {
        self.grant.send(()).is_ok()
    }
}

/// Unbounded FIFO. Insertion order is admission order.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    entries: VecDeque<Waiter>,
    next_id: u64,
}

impl AdmissionQueue {
    /// Append a waiter at the tail.
    pub fn enqueue(&mut self, grant: oneshot::Sender<()>) -> WaiterId {
        let id = WaiterId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.push_back(Waiter { id, grant });
        id
    }

    /// Remove and return the head, or `None` if empty.
    pub fn dequeue_front(&mut self) -> Option<Waiter> {
        self.entries.pop_front()
    }

    /// Remove a specific waiter wherever it sits. O(n).
    pub fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let idx = self.entries.iter().position(|w| w.id == id)?;
        self.entries.remove(idx)
    }

    /// Take every waiter, oldest first, leaving the queue empty.
    pub fn take_all(&mut self) -> Vec<Waiter> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
