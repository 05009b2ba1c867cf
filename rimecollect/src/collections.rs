//! Fixed-capacity collections.
//!
//! Capacity comes from `CollectConfig` at construction time. Storage is
//! reserved up front so steady-state operation never reallocates.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// FIFO with a hard upper bound.
///
/// `push_back` hands the value back when the queue is full instead of
/// evicting anything.
pub struct BoundedQueue<T> {
    inner: VecDeque<T>,
    max: usize,
}

impl<T> BoundedQueue<T> {
    pub fn with_max_capacity(max: usize) -> Self {
        Self {
            inner: VecDeque::with_capacity(max),
            max,
        }
    }

    /// Append to the back, or return the value if no slot is free.
    pub fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.inner.push_back(value);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.inner.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.inner.front_mut()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn max_len(&self) -> usize {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.max
    }

    /// At least half of the slots are in use.
    pub fn is_half_full(&self) -> bool {
        self.inner.len() * 2 >= self.max
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    /// Retain elements matching predicate, skipping the first `skip` elements.
    ///
    /// Returns the number of elements removed.
    pub fn retain_after<F>(&mut self, skip: usize, mut f: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.inner.len();
        let mut index = 0;
        self.inner.retain(|x| {
            let keep = index < skip || f(x);
            index += 1;
            keep
        });
        before - self.inner.len()
    }
}

/// Ring of the most recent `capacity` items; pushing into a full ring
/// overwrites the oldest.
pub struct RecentRing<T> {
    slots: Vec<T>,
    next: usize,
    capacity: usize,
}

impl<T: PartialEq> RecentRing<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.slots.len() < self.capacity {
            self.slots.push(value);
        } else {
            self.slots[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn contains(&self, value: &T) -> bool {
        self.slots.iter().any(|v| v == value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
