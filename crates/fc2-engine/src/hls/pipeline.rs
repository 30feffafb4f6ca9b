//! Ordered Fragment Pipeline (C1, spec.md §4.4).
//!
//! Two bounded priority structures keyed by sequence number: `url_queue`
//! (fragment URLs waiting to be fetched) and `data_queue` (fetched bytes
//! waiting to be written), each with capacity 100. Producers block on
//! insert-when-full, consumers block on pop-when-empty — this is the
//! end-to-end backpressure mechanism (§4.4, I2).
//!
//! Grounded on the original's `asyncio.PriorityQueue(100)` pairing; Rust has
//! no bounded async priority queue in the standard library or in the
//! teacher's dependency stack, so this reimplements the minimal piece: a
//! `BinaryHeap` ordered by sequence number, guarded by a `tokio::sync::Mutex`
//! plus two `Notify`s for the blocking put/pop semantics.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::sync::{Mutex, Notify};

/// Default bound for both `url_queue` and `data_queue` (§3 "Ordered Fragment
/// Pipeline").
pub const CAPACITY: usize = 100;

struct Entry<T> {
    sequence: u64,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

/// A bounded, sequence-ordered async queue. Pop always returns the
/// lowest-sequence entry currently held, regardless of insertion order.
pub struct SequenceQueue<T> {
    capacity: usize,
    heap: Mutex<BinaryHeap<Reverse<Entry<T>>>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> SequenceQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn bounded() -> Self {
        Self::new(CAPACITY)
    }

    /// Block until there is room, then insert `(sequence, value)`.
    pub async fn put(&self, sequence: u64, value: T) {
        loop {
            {
                let mut heap = self.heap.lock().await;
                if heap.len() < self.capacity {
                    heap.push(Reverse(Entry { sequence, value }));
                    drop(heap);
                    self.not_empty.notify_one();
                    return;
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Block until an entry is available, then return the lowest-sequence
    /// one.
    pub async fn pop(&self) -> (u64, T) {
        loop {
            {
                let mut heap = self.heap.lock().await;
                if let Some(Reverse(entry)) = heap.pop() {
                    drop(heap);
                    self.not_full.notify_one();
                    return (entry.sequence, entry.value);
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn pop_returns_lowest_sequence_first() {
        let q = SequenceQueue::new(10);
        q.put(3, "c").await;
        q.put(1, "a").await;
        q.put(2, "b").await;
        assert_eq!(q.pop().await, (1, "a"));
        assert_eq!(q.pop().await, (2, "b"));
        assert_eq!(q.pop().await, (3, "c"));
    }

    #[tokio::test]
    async fn put_blocks_when_full_until_a_pop_frees_capacity() {
        let q = Arc::new(SequenceQueue::new(1));
        q.put(0, "first").await;
        assert_eq!(q.len().await, 1);

        let q2 = Arc::clone(&q);
        let blocked_put = tokio::spawn(async move {
            q2.put(1, "second").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked_put.is_finished());

        let popped = q.pop().await;
        assert_eq!(popped, (0, "first"));

        tokio::time::timeout(Duration::from_secs(1), blocked_put)
            .await
            .expect("put should unblock after pop")
            .unwrap();
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn pop_blocks_until_an_entry_is_pushed() {
        let q = Arc::new(SequenceQueue::<&'static str>::new(10));
        let q2 = Arc::clone(&q);
        let reader = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        q.put(7, "late").await;
        let (seq, value) = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seq, 7);
        assert_eq!(value, "late");
    }
}
