//! Fixed-capacity FIFO used for every hand-off between threads.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

/// What `push` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Reject the incoming item right away.
    DropNewest,
    /// Wait up to the given time for room, then reject the incoming item.
    Block(Duration),
}

/// Multi-producer, multi-consumer bounded queue.
///
/// The queue owns both channel ends, so it never disconnects while alive and
/// the blocking operations only return when an item shows up or time runs out.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    overflow: Overflow,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, overflow: Overflow) -> Self {
        // a zero-capacity crossbeam channel is a rendezvous, not a queue
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            overflow,
        }
    }

    /// Enqueue `item` following the queue's overflow policy.
    ///
    /// On overflow the rejected item is handed back to the caller.
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.overflow {
            Overflow::DropNewest => self.tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
            }),
            Overflow::Block(timeout) => self.tx.send_timeout(item, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(item) | SendTimeoutError::Disconnected(item) => item,
            }),
        }
    }

    /// Block until an item is available.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout`; `None` once it expires.
    pub fn pop_for(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.try_pop();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
