//! A concurrency-safe binary max-heap of pending loads.
//!
//! Every structural change happens under a single `Mutex`. The element count is mirrored into an
//! atomic while that lock is held, so `size` can be read without locking. Payloads only need to be
//! `Send` for the collector to be shared between tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::Load;

pub struct PriorityCollector<T> {
    loads: Mutex<Vec<Load<T>>>,
    length: AtomicUsize,
}

impl<T> Default for PriorityCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityCollector<T> {
    pub fn new() -> Self {
        Self {
            loads: Mutex::new(Vec::new()),
            length: AtomicUsize::new(0),
        }
    }

    // Heap order is restored before any guard is dropped, so a poisoned lock still holds a heap.
    fn lock(&self) -> MutexGuard<'_, Vec<Load<T>>> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a load, sifting it toward the root while it is more urgent than its parent.
    pub fn insert(&self, load: Load<T>) {
        let mut loads = self.lock();
        loads.push(load);
        self.length.store(loads.len(), Ordering::SeqCst);
        sift_up(&mut loads);
    }

    /// Remove and return the most urgent load, or `None` if there is nothing pending.
    pub fn extract_top(&self) -> Option<Load<T>> {
        let mut loads = self.lock();
        if loads.is_empty() {
            return None;
        }

        // Moves the last element into the root slot.
        let top = loads.swap_remove(0);
        self.length.store(loads.len(), Ordering::SeqCst);
        sift_down(&mut loads);
        Some(top)
    }

    /// The number of pending loads.
    pub fn size(&self) -> usize {
        self.length.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The priority of the load `extract_top` would return next.
    pub fn peek_priority(&self) -> Option<u16> {
        let loads = self.lock();
        loads.first().map(Load::priority)
    }

    #[cfg(test)]
    fn is_heap(&self) -> bool {
        let loads = self.lock();
        (1..loads.len()).all(|child| loads[(child - 1) / 2].priority() >= loads[child].priority())
    }
}

fn sift_up<T>(loads: &mut [Load<T>]) {
    let Some(mut index) = loads.len().checked_sub(1) else {
        return;
    };
    while index > 0 {
        let parent = (index - 1) / 2;
        if loads[index].priority() <= loads[parent].priority() {
            break;
        }
        loads.swap(index, parent);
        index = parent;
    }
}

fn sift_down<T>(loads: &mut [Load<T>]) {
    let len = loads.len();
    let mut index = 0;
    loop {
        let left = 2 * index + 1;
        if left >= len {
            break;
        }
        let right = left + 1;
        let urgent = if right < len && loads[right].priority() > loads[left].priority() {
            right
        } else {
            left
        };
        if loads[index].priority() >= loads[urgent].priority() {
            break;
        }
        loads.swap(index, urgent);
        index = urgent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn drain(collector: &PriorityCollector<()>) -> Vec<u16> {
        std::iter::from_fn(|| collector.extract_top())
            .map(|load| load.priority())
            .collect()
    }

    #[test]
    fn test_extraction_order() {
        let collector = PriorityCollector::new();
        for weight in [5, 1, 9, 3] {
            collector.insert(Load::new(weight, ()));
        }

        assert_eq!(collector.peek_priority(), Some(9));
        assert_eq!(drain(&collector), vec![9, 5, 3, 1]);
    }

    #[test]
    fn test_empty_extraction() {
        let collector: PriorityCollector<()> = PriorityCollector::new();
        assert!(collector.extract_top().is_none());
        assert!(collector.extract_top().is_none());
        assert_eq!(collector.size(), 0);
        assert!(collector.is_empty());
        assert_eq!(collector.peek_priority(), None);
    }

    #[test]
    fn test_payload_travels_with_priority() {
        let collector = PriorityCollector::new();
        collector.insert(Load::new(1, "low"));
        collector.insert(Load::new(100, "high"));
        collector.insert(Load::new(50, "medium"));

        let order: Vec<_> = std::iter::from_fn(|| collector.extract_top())
            .map(Load::into_payload)
            .collect();
        assert_eq!(order, vec!["high", "medium", "low"]);
    }

    #[test]
    fn test_duplicate_weights() {
        let collector = PriorityCollector::new();
        for weight in [2, 2, 7, 2, 7, 0] {
            collector.insert(Load::new(weight, ()));
        }
        assert!(collector.is_heap());
        assert_eq!(drain(&collector), vec![7, 7, 2, 2, 2, 0]);
    }

    /// Many threads insert at once; sequential extraction recovers every load exactly once.
    #[test]
    fn test_concurrent_inserts() {
        let collector = Arc::new(PriorityCollector::new());

        let handles: Vec<_> = (0..8u16)
            .map(|thread| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..125u16 {
                        collector.insert(Load::new((thread * 125 + i) % 100, thread * 125 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.size(), 1000);
        assert!(collector.is_heap());

        let mut ids = vec![];
        let mut last = u16::MAX;
        while let Some(load) = collector.extract_top() {
            assert!(load.priority() <= last);
            last = load.priority();
            ids.push(load.into_payload());
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..1000).collect::<Vec<u16>>());
    }

    /// Inserting and extracting from different threads at once never loses or duplicates loads.
    #[test]
    fn test_concurrent_insert_and_extract() {
        let collector = Arc::new(PriorityCollector::new());
        for i in 0..500u32 {
            collector.insert(Load::new((i % 17) as u16, i));
        }

        let producer = {
            let collector = Arc::clone(&collector);
            std::thread::spawn(move || {
                for i in 500..1000u32 {
                    collector.insert(Load::new((i % 17) as u16, i));
                }
            })
        };
        let consumer = {
            let collector = Arc::clone(&collector);
            std::thread::spawn(move || {
                let mut taken = vec![];
                while taken.len() < 400 {
                    if let Some(load) = collector.extract_top() {
                        taken.push(load.into_payload());
                    }
                }
                taken
            })
        };

        producer.join().unwrap();
        let mut seen = consumer.join().unwrap();
        assert_eq!(collector.size(), 600);
        assert!(collector.is_heap());

        seen.extend(std::iter::from_fn(|| collector.extract_top()).map(Load::into_payload));
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<u32>>());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u16),
        Extract,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u16>().prop_map(Op::Insert), Just(Op::Extract)]
    }

    proptest! {
        /// The heap property and the size count hold after every operation.
        #[test]
        fn prop_heap_invariant(ops in prop::collection::vec(op(), 0..300)) {
            let collector = PriorityCollector::new();
            let mut expected = 0usize;
            for op in ops {
                match op {
                    Op::Insert(weight) => {
                        collector.insert(Load::new(weight, ()));
                        expected += 1;
                    }
                    Op::Extract => {
                        if collector.extract_top().is_some() {
                            expected -= 1;
                        }
                    }
                }
                prop_assert!(collector.is_heap());
                prop_assert_eq!(collector.size(), expected);
            }
        }

        #[test]
        fn prop_drains_in_descending_order(weights in prop::collection::vec(any::<u16>(), 0..200)) {
            let collector = PriorityCollector::new();
            for &weight in &weights {
                collector.insert(Load::new(weight, ()));
            }

            let mut sorted = weights.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            prop_assert_eq!(drain(&collector), sorted);
        }
    }
}
