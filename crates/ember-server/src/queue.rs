//! Bounded FIFO queue between submitting threads and one worker.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Why an item could not be queued. The item is handed back.
#[derive(Debug)]
pub(crate) enum PushError<T> {
    /// Every slot is taken.
    Full(T),
    /// The queue no longer accepts items.
    Stopped(T),
}

struct QueueInner<T> {
    items: VecDeque<T>,
    stopping: bool,
}

/// Fixed-capacity FIFO with many producers and one consumer.
///
/// Once stopped, pushes fail and blocked producers are woken, while the
/// consumer keeps popping until the queue is drained.
pub(crate) struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                stopping: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.inner.lock().stopping
    }

    /// Appends an item if a slot is free.
    pub(crate) fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        if inner.stopping {
            return Err(PushError::Stopped(item));
        }
        if inner.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends an item, waiting for a free slot.
    ///
    /// Fails only when the queue is stopped, including while waiting.
    pub(crate) fn push_blocking(&self, item: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.stopping {
                return Err(PushError::Stopped(item));
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Removes the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is stopped and drained.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.stopping {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Stops accepting items and wakes every waiter.
    pub(crate) fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopping = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
