//! In-memory delivery order over the durable pending set.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::TaskId;

/// Heap entry: higher priority first, then lower arrival sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeliveryEntry {
    pub priority: i64,
    pub seq: i64,
    pub id: TaskId,
}

impl Ord for DeliveryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DeliveryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of deliverable tasks.
///
/// May hold stale entries (a task finished or claimed elsewhere); the claim
/// against the store decides, so stale entries are simply dropped on pop.
#[derive(Debug, Default)]
pub(crate) struct DeliveryHeap {
    heap: BinaryHeap<DeliveryEntry>,
}

impl DeliveryHeap {
    pub fn push(&mut self, entry: DeliveryEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<DeliveryEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = DeliveryEntry>) {
        self.heap = entries.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: i64, seq: i64) -> DeliveryEntry {
        DeliveryEntry {
            priority,
            seq,
            id: TaskId::from(format!("t{seq}")),
        }
    }

    #[test]
    fn test_higher_priority_pops_first() {
        let mut heap = DeliveryHeap::default();
        heap.push(entry(0, 1));
        heap.push(entry(5, 2));
        heap.push(entry(0, 3));

        let order: Vec<i64> = std::iter::from_fn(|| heap.pop()).map(|e| e.seq).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut heap = DeliveryHeap::default();
        for seq in [4, 2, 9, 1] {
            heap.push(entry(3, seq));
        }

        let order: Vec<i64> = std::iter::from_fn(|| heap.pop()).map(|e| e.seq).collect();
        assert_eq!(order, vec![1, 2, 4, 9]);
    }

    #[test]
    fn test_negative_priority_after_default() {
        let mut heap = DeliveryHeap::default();
        heap.push(entry(-1, 1));
        heap.push(entry(0, 2));
        assert_eq!(heap.pop().map(|e| e.seq), Some(2));
        assert_eq!(heap.len(), 1);
    }
}
