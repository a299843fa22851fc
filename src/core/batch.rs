use std::fmt;
use std::time::{Duration, Instant};

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// The batch reached `max_batch_size`.
    Size,
    /// The batch outlived `max_batch_age`.
    Age,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Size => f.write_str("size"),
            FlushTrigger::Age => f.write_str("age"),
        }
    }
}

/// A flushed batch, handed by value to the batch handler.
///
/// Once built it is detached from the worker; nothing appends to it again.
#[derive(Debug)]
pub struct Batch<T> {
    items: Vec<T>,
    created_at: Instant,
    trigger: FlushTrigger,
    sequence: u64,
}

impl<T> Batch<T> {
    pub(crate) fn new(
        items: Vec<T>,
        created_at: Instant,
        trigger: FlushTrigger,
        sequence: u64,
    ) -> Self {
        Self {
            items,
            created_at,
            trigger,
            sequence,
        }
    }

    /// Items in enqueue order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger
    }

    /// Position of this batch among the worker's flushes, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time from batch creation until now.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
