// src/dag/delay_queue.rs

//! Holding pen for job starts that have to be attempted again later.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct DelayedItem<T> {
    ready_at: Instant,
    item: T,
}

/// Queue where an item only becomes eligible for dequeue once
/// `min_delay + uniform(0, randomized_delay)` has elapsed since it was
/// enqueued.
///
/// It never blocks: [`DelayQueue::dequeue`] returns `None` when nothing is
/// eligible yet. Among eligible items the earliest eligible one wins, ties go
/// to the one enqueued first.
#[derive(Debug)]
pub struct DelayQueue<T> {
    min_delay: Duration,
    randomized_delay: Duration,
    items: VecDeque<DelayedItem<T>>,
}

impl<T> DelayQueue<T> {
    pub fn new(min_delay: Duration, randomized_delay: Duration) -> Self {
        Self {
            min_delay,
            randomized_delay,
            items: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.enqueue_at(item, Instant::now());
    }

    pub fn enqueue_at(&mut self, item: T, now: Instant) {
        let ready_at = now + self.min_delay + self.jitter();
        self.items.push_back(DelayedItem { ready_at, item });
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.dequeue_at(Instant::now())
    }

    pub fn dequeue_at(&mut self, now: Instant) -> Option<T> {
        let idx = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.ready_at <= now)
            .min_by_key(|(_, entry)| entry.ready_at)
            .map(|(idx, _)| idx)?;

        self.items.remove(idx).map(|entry| entry.item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn jitter(&self) -> Duration {
        if self.randomized_delay.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.randomized_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_is_held_back_until_min_delay_elapsed() {
        let mut q = DelayQueue::new(Duration::from_secs(30), Duration::ZERO);
        let t0 = Instant::now();
        q.enqueue_at("a", t0);

        assert_eq!(q.dequeue_at(t0), None);
        assert_eq!(q.dequeue_at(t0 + Duration::from_secs(29)), None);
        assert_eq!(q.dequeue_at(t0 + Duration::from_secs(30)), Some("a"));
        assert!(q.is_empty());
    }

    #[test]
    fn ties_are_broken_by_insertion_order() {
        let mut q = DelayQueue::new(Duration::from_secs(1), Duration::ZERO);
        let t0 = Instant::now();
        q.enqueue_at("first", t0);
        q.enqueue_at("second", t0);

        let later = t0 + Duration::from_secs(5);
        assert_eq!(q.dequeue_at(later), Some("first"));
        assert_eq!(q.dequeue_at(later), Some("second"));
        assert_eq!(q.dequeue_at(later), None);
    }

    #[test]
    fn earliest_eligible_item_wins_over_queue_head() {
        let mut q = DelayQueue::new(Duration::from_secs(10), Duration::ZERO);
        let t0 = Instant::now();
        q.enqueue_at("late", t0 + Duration::from_secs(5));
        q.enqueue_at("early", t0);

        assert_eq!(q.dequeue_at(t0 + Duration::from_secs(12)), Some("early"));
        assert_eq!(q.dequeue_at(t0 + Duration::from_secs(12)), None);
        assert_eq!(q.dequeue_at(t0 + Duration::from_secs(15)), Some("late"));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut q = DelayQueue::new(Duration::from_secs(1), Duration::from_secs(2));
        let t0 = Instant::now();
        for i in 0..50 {
            q.enqueue_at(i, t0);
        }

        assert_eq!(q.dequeue_at(t0 + Duration::from_millis(999)), None);

        let mut drained = 0;
        while q.dequeue_at(t0 + Duration::from_secs(3)).is_some() {
            drained += 1;
        }
        assert_eq!(drained, 50);
    }
}
