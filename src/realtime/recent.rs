//! Bounded newest-first buffer backing the live activity feed

use std::collections::VecDeque;

/// Keeps the most recent items, newest at index 0. When full, the oldest
/// item falls off the back.
#[derive(Debug, Clone)]
pub struct RecentBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentBuffer<T> {
    /// A capacity of zero is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    /// Put an item at the front, evicting the oldest when full.
    pub fn prepend(&mut self, item: T) {
        if self.buf.len() >= self.capacity {
            let _ = self.buf.pop_back();
        }
        self.buf.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

impl<T: Clone> RecentBuffer<T> {
    /// Copy of the contents, newest first
    pub fn snapshot(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}
