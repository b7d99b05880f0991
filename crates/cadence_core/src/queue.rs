//! FIFO event queue
//!
//! A minimal first-in-first-out buffer used by `use_event` to hold firings
//! between the producer callback and consumer iteration on the next tick.

use std::collections::VecDeque;

/// Unbounded FIFO queue.
///
/// Events pushed by a producer are popped in firing order by the consumer.
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append an item at the back
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the front item, or `None` if empty
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all buffered items
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
