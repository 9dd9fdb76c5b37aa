//! Deferred-delivery timer queue
//!
//! One-shot timers keyed by notifier handle. Arming with a zero delay
//! is the engine's deferred-callback primitive: already-available
//! results (denied permission, cached position) are still delivered
//! from a later pump, never synchronously from the registration call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::notifier::NotifierId;

#[derive(Debug, Clone, Copy)]
struct Entry {
    deadline: Instant,
    /// Arming sequence, to make same-deadline firing order stable.
    seq: u64,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: HashMap<NotifierId, Entry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the one-shot timer for `notifier`.
    pub fn arm(&mut self, notifier: NotifierId, delay: Duration, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            notifier,
            Entry {
                deadline: now + delay,
                seq,
            },
        );
    }

    /// Disarm the timer for `notifier`. Returns true if one was armed.
    pub fn stop(&mut self, notifier: NotifierId) -> bool {
        self.entries.remove(&notifier).is_some()
    }

    pub fn is_armed(&self, notifier: NotifierId) -> bool {
        self.entries.contains_key(&notifier)
    }

    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Remove and return every timer due at `now`, in arming order.
    pub fn take_due(&mut self, now: Instant) -> Vec<NotifierId> {
        let mut due: Vec<(NotifierId, Entry)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, e)| (*id, *e))
            .collect();
        due.sort_by_key(|(_, e)| (e.deadline, e.seq));
        for (id, _) in &due {
            self.entries.remove(id);
        }
        due.into_iter().map(|(id, _)| id).collect()
    }

    /// Time until the earliest armed timer fires, if any.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.entries
            .values()
            .map(|e| e.deadline.saturating_duration_since(now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn keys(n: usize) -> Vec<NotifierId> {
        let mut arena: SlotMap<NotifierId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn test_zero_delay_due_immediately() {
        let k = keys(1);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(k[0], Duration::ZERO, now);
        assert_eq!(queue.take_due(now), vec![k[0]]);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_not_due_before_deadline() {
        let k = keys(1);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(k[0], Duration::from_secs(5), now);
        assert!(queue.take_due(now).is_empty());
        assert!(queue.take_due(now + Duration::from_secs(4)).is_empty());
        assert_eq!(queue.take_due(now + Duration::from_secs(5)), vec![k[0]]);
    }

    #[test]
    fn test_stop_disarms() {
        let k = keys(1);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(k[0], Duration::ZERO, now);
        assert!(queue.stop(k[0]));
        assert!(!queue.stop(k[0]));
        assert!(queue.take_due(now).is_empty());
    }

    #[test]
    fn test_same_deadline_fires_in_arming_order() {
        let k = keys(3);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(k[2], Duration::ZERO, now);
        queue.arm(k[0], Duration::ZERO, now);
        queue.arm(k[1], Duration::ZERO, now);
        assert_eq!(queue.take_due(now), vec![k[2], k[0], k[1]]);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let k = keys(1);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.arm(k[0], Duration::from_secs(10), now);
        queue.arm(k[0], Duration::ZERO, now);
        assert_eq!(queue.take_due(now), vec![k[0]]);
    }

    #[test]
    fn test_time_until_next() {
        let k = keys(2);
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        assert_eq!(queue.time_until_next(now), None);
        queue.arm(k[0], Duration::from_secs(9), now);
        queue.arm(k[1], Duration::from_secs(3), now);
        assert_eq!(queue.time_until_next(now), Some(Duration::from_secs(3)));
    }
}
