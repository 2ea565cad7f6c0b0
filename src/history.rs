//! Bounded, thread-safe history of recently received messages.
//!
//! Holds at most `capacity` entries in arrival order. Adding to a full
//! history evicts the single oldest entry first. Readers only ever get a
//! copy of the contents, never a live view.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Fixed-capacity FIFO of message strings shared across sessions.
#[derive(Debug)]
pub struct History {
    entries: Mutex<VecDeque<String>>,
    capacity: NonZeroUsize,
}

impl History {
    /// Create an empty history holding at most `capacity` messages.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.get())),
            capacity,
        }
    }

    /// Append `text` as the newest entry, evicting the oldest when full.
    pub fn add(&self, text: impl Into<String>) {
        let mut entries = self.lock();
        if entries.len() == self.capacity.get() {
            if let Some(evicted) = entries.pop_front() {
                trace!(evicted = %evicted, "History full, evicted oldest message");
            }
        }
        entries.push_back(text.into());
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    // Every mutation completes while the guard is held, so a poisoned lock
    // still protects a consistent deque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
