//! Mutex-guarded FIFO feeding a drain loop.
//!
//! Unbounded unless a capacity is configured. With a capacity, a full queue
//! applies its [`OverflowPolicy`] instead of blocking the producer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Deserialize;

/// What a bounded queue does with an item that arrives while it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the incoming item.
    #[default]
    DropNew,
    /// Evict the item at the head to make room.
    DropOldest,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_new" | "dropnew" => Ok(OverflowPolicy::DropNew),
            "drop_oldest" | "dropoldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(format!("unknown overflow policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Accepted,
    /// The pushed item was discarded.
    RejectedNew,
    /// The pushed item was queued and the head was evicted.
    EvictedOldest,
}

#[derive(Debug)]
pub(crate) struct PendingQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
}

impl<T> PendingQueue<T> {
    pub(crate) fn new(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.map(|c| c.max(1));
        let initial = capacity.unwrap_or(0).min(1024);
        Self {
            items: Mutex::new(VecDeque::with_capacity(initial)),
            capacity,
            overflow,
        }
    }

    pub(crate) fn push(&self, item: T) -> PushOutcome {
        let mut items = self.items.lock();
        match self.capacity {
            Some(cap) if items.len() >= cap => match self.overflow {
                OverflowPolicy::DropNew => PushOutcome::RejectedNew,
                OverflowPolicy::DropOldest => {
                    items.pop_front();
                    items.push_back(item);
                    PushOutcome::EvictedOldest
                }
            },
            _ => {
                items.push_back(item);
                PushOutcome::Accepted
            }
        }
    }

    /// Removes up to `max` items from the head, in order.
    pub(crate) fn take(&self, max: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let n = items.len().min(max);
        if n == 0 {
            return Vec::new();
        }
        items.drain(..n).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_preserves_order_and_respects_max() {
        let q = PendingQueue::new(None, OverflowPolicy::DropNew);
        for i in 0..5 {
            assert_eq!(q.push(i), PushOutcome::Accepted);
        }
        assert_eq!(q.take(3), vec![0, 1, 2]);
        assert_eq!(q.take(10), vec![3, 4]);
        assert!(q.take(10).is_empty());
    }

    #[test]
    fn drop_new_rejects_incoming_item() {
        let q = PendingQueue::new(Some(1), OverflowPolicy::DropNew);
        assert_eq!(q.push("m1"), PushOutcome::Accepted);
        assert_eq!(q.push("m2"), PushOutcome::RejectedNew);
        assert_eq!(q.len(), 1);
        assert_eq!(q.take(1), vec!["m1"]);
    }

    #[test]
    fn drop_oldest_replaces_existing_item() {
        let q = PendingQueue::new(Some(2), OverflowPolicy::DropOldest);
        q.push("m1");
        q.push("m2");
        assert_eq!(q.push("m3"), PushOutcome::EvictedOldest);
        assert_eq!(q.take(5), vec!["m2", "m3"]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let q = PendingQueue::new(Some(0), OverflowPolicy::DropNew);
        assert_eq!(q.push(1), PushOutcome::Accepted);
        assert_eq!(q.push(2), PushOutcome::RejectedNew);
    }

    #[test]
    fn overflow_policy_parses_from_str() {
        assert_eq!("drop_oldest".parse(), Ok(OverflowPolicy::DropOldest));
        assert_eq!(" Drop_New ".parse(), Ok(OverflowPolicy::DropNew));
        assert!("block".parse::<OverflowPolicy>().is_err());
    }
}
