// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity circular buffer used by the publisher to batch records.
//!
//! Slots are addressed by two indices, `head` (newest) and `tail` (oldest), modulo the
//! capacity. Enqueueing into a full ring evicts the oldest unread value: a slow sink sheds data
//! instead of blocking the pipeline once more records arrive between two flushes than the ring
//! can hold.

use crate::constants::DEFAULT_RING_CAPACITY;
use std::iter::FusedIterator;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the most recently written value, `None` while the ring is empty.
    head: Option<usize>,
    /// Index of the least recently written value. Always `0` while the ring is empty.
    tail: usize,
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);
        Self {
            slots,
            head: None,
            tail: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.head {
            None => 0,
            Some(head) if self.tail > head => head + self.capacity() + 1 - self.tail,
            Some(head) => head - self.tail + 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Writes `value` after the newest element and returns the value evicted to make room, if
    /// the ring was already full.
    pub fn enqueue(&mut self, value: T) -> Option<T> {
        let Some(head) = self.head else {
            self.slots[0] = Some(value);
            self.head = Some(0);
            self.tail = 0;
            return None;
        };

        let next = self.wrap(head + 1);
        let evicted = if next == self.tail {
            let evicted = self.slots[self.tail].take();
            self.tail = self.wrap(self.tail + 1);
            evicted
        } else {
            None
        };
        self.slots[next] = Some(value);
        self.head = Some(next);
        evicted
    }

    /// Removes and returns the oldest value.
    pub fn dequeue(&mut self) -> Option<T> {
        let head = self.head?;
        let value = self.slots[self.tail].take();
        if self.tail == head {
            self.head = None;
            self.tail = 0;
        } else {
            self.tail = self.wrap(self.tail + 1);
        }
        value
    }

    /// The value [`RingBuffer::dequeue`] would return, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.head?;
        self.slots[self.tail].as_ref()
    }

    /// Resizes the ring, keeping the logical order of its contents.
    ///
    /// Growing keeps every value. Shrinking below the current length evicts the oldest values,
    /// the same policy `enqueue` applies to a full ring. A capacity of zero is raised to one.
    /// Returns the number of evicted values.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        let capacity = capacity.max(1);
        if capacity == self.capacity() {
            return 0;
        }

        let mut values = Vec::with_capacity(self.len());
        while let Some(value) = self.dequeue() {
            values.push(value);
        }
        let evicted = values.len().saturating_sub(capacity);

        *self = Self::new(capacity);
        for value in values.into_iter().skip(evicted) {
            self.enqueue(value);
        }
        evicted
    }

    /// Restartable iterator over the contents, oldest to newest.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            ring: self,
            index: 0,
            finished: false,
        }
    }

    fn wrap(&self, position: usize) -> usize {
        position % self.slots.len()
    }
}

/// Forward cursor over a [`RingBuffer`] that does not mutate it.
///
/// Once exhausted it keeps returning `None` until [`Iter::reset`] rewinds it to the oldest value.
#[derive(Debug, Clone)]
pub struct Iter<'a, T> {
    ring: &'a RingBuffer<T>,
    index: usize,
    finished: bool,
}

impl<'a, T> Iter<'a, T> {
    pub fn reset(&mut self) {
        self.index = 0;
        self.finished = false;
    }

    /// How many values have been yielded since the last reset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.index
    }

    /// Values not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            self.ring.len() - self.index
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(head) = self.ring.head else {
            self.finished = true;
            return None;
        };

        let idx = self.ring.wrap(self.ring.tail + self.index);
        if idx == head {
            self.finished = true;
        }
        self.index += 1;
        self.ring.slots[idx].as_ref()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a RingBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
