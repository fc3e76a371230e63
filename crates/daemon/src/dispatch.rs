//! Priority dispatch queue.
//!
//! Holds `(sort key, job id)` entries for pending jobs and hands them to idle
//! workers. Record contents stay in the job table; a worker that pops an id
//! whose record is no longer pending simply drops it.

use crate::jobs::{CompressionJob, JobPriority};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// One dispatchable job reference.
///
/// Ordered so that the entry to run next compares greatest: higher priority
/// first, then earlier `created_at`, then the smaller `job_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    pub priority: JobPriority,
    pub created_at: i64,
    pub job_id: String,
}

impl DispatchEntry {
    pub fn for_job(job: &CompressionJob) -> Self {
        Self {
            priority: job.priority,
            created_at: job.created_at,
            job_id: job.job_id.clone(),
        }
    }
}

impl Ord for DispatchEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

impl PartialOrd for DispatchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Thread-safe priority queue with async blocking pop.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<DispatchEntry>>,
    available: Notify,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: DispatchEntry) {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<DispatchEntry> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Wait until an entry is available and take it.
    pub async fn pop(&self) -> DispatchEntry {
        loop {
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            self.available.notified().await;
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<DispatchEntry> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn entry(id: &str, priority: JobPriority, created_at: i64) -> DispatchEntry {
        DispatchEntry {
            priority,
            created_at,
            job_id: id.to_string(),
        }
    }

    fn drain(queue: &DispatchQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.try_pop().map(|e| e.job_id)).collect()
    }

    fn priority_strategy() -> impl Strategy<Value = JobPriority> {
        prop_oneof![
            Just(JobPriority::Low),
            Just(JobPriority::Normal),
            Just(JobPriority::High),
            Just(JobPriority::Urgent),
        ]
    }

    // *For any* set of entries, draining the queue SHALL yield them sorted by
    // (-priority, created_at, job_id) regardless of insertion order.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_drain_order_matches_sort_key(
            specs in prop::collection::vec((priority_strategy(), 0i64..20, "[a-e]{1,3}"), 0..40)
        ) {
            let queue = DispatchQueue::new();
            let mut expected: Vec<(i32, i64, String)> = Vec::new();
            for (priority, created_at, id) in &specs {
                queue.push(entry(id, *priority, *created_at));
                expected.push((-(priority.value() as i32), *created_at, id.clone()));
            }
            expected.sort();

            let drained = drain(&queue);
            let expected_ids: Vec<String> = expected.into_iter().map(|(_, _, id)| id).collect();
            prop_assert_eq!(drained, expected_ids);
        }
    }

    #[test]
    fn test_higher_priority_first() {
        let queue = DispatchQueue::new();
        queue.push(entry("low", JobPriority::Low, 1));
        queue.push(entry("urgent", JobPriority::Urgent, 2));
        queue.push(entry("normal", JobPriority::Normal, 3));

        assert_eq!(drain(&queue), vec!["urgent", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = DispatchQueue::new();
        queue.push(entry("b", JobPriority::Normal, 20));
        queue.push(entry("a", JobPriority::Normal, 10));

        assert_eq!(drain(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_job_id_breaks_timestamp_ties() {
        let queue = DispatchQueue::new();
        queue.push(entry("zeta", JobPriority::High, 5));
        queue.push(entry("alpha", JobPriority::High, 5));

        assert_eq!(drain(&queue), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_len_and_empty() {
        let queue = DispatchQueue::new();
        assert!(queue.is_empty());
        queue.push(entry("a", JobPriority::Normal, 1));
        queue.push(entry("a", JobPriority::Normal, 1));
        assert_eq!(queue.len(), 2);
        queue.try_pop();
        queue.try_pop();
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_timeout_on_empty_queue() {
        let queue = DispatchQueue::new();
        let start = std::time::Instant::now();

        assert!(queue.pop_timeout(Duration::from_millis(50)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(DispatchQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop_timeout(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(entry("late", JobPriority::Normal, 1));

        let popped = waiter.await.unwrap().expect("waiter should receive the entry");
        assert_eq!(popped.job_id, "late");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_entry_delivered_once_to_concurrent_poppers() {
        let queue = Arc::new(DispatchQueue::new());
        let poppers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(e) = queue.pop_timeout(Duration::from_millis(200)).await {
                        got.push(e.job_id);
                    }
                    got
                })
            })
            .collect();

        for i in 0..100 {
            queue.push(entry(&format!("job-{:03}", i), JobPriority::Normal, i));
        }

        let mut all = Vec::new();
        for p in poppers {
            all.extend(p.await.unwrap());
        }
        assert_eq!(all.len(), 100);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 100);
    }
}
