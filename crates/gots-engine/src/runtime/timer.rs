//! Per-task timer heap (spec.md §4.8, §5): "a task may only process its
//! own timers." Grounded in the reference workspace's
//! `vm::scheduler::timer::TimerThread` min-heap (reversed `Ord` over
//! `Instant` for a min-heap out of `BinaryHeap`'s max-heap), narrowed
//! from one process-wide timer thread down to one heap per task and
//! extended with the insertion-order tiebreak spec.md §4.8 requires
//! ("ties broken by insertion order").

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

pub type TimerId = u64;

#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub id: TimerId,
    pub deadline: Instant,
    /// Insertion sequence, used only to break deadline ties
    /// deterministically (spec.md §4.8).
    pub seq: u64,
    pub callback_addr: usize,
    pub is_interval: bool,
    pub interval: Duration,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest
        // deadline first; within equal deadlines the earlier-inserted
        // entry sorts first (also reversed, for the same reason).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exclusive per-task timer priority queue plus its cancelled-id set.
/// Cancelled timers are not removed eagerly; they are skipped when
/// popped (spec.md §4.8 "cancel-timer").
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    cancelled: HashSet<TimerId>,
    next_id: TimerId,
    next_seq: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap::default()
    }

    /// Inserts a new timer, returning its id.
    pub fn schedule(&mut self, deadline: Instant, callback_addr: usize, is_interval: bool, interval: Duration) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            id,
            deadline,
            seq,
            callback_addr,
            is_interval,
            interval,
        });
        id
    }

    /// Records `id` as cancelled. Idempotent and non-blocking (spec.md
    /// §5). The entry, if present, is left in the heap and skipped when
    /// it is eventually popped.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    pub fn is_cancelled(&self, id: TimerId) -> bool {
        self.cancelled.contains(&id)
    }

    /// Pops every entry whose deadline has passed, skipping cancelled
    /// ones, and re-inserts interval timers with an updated deadline.
    /// Returns the callback addresses due to fire, in deadline order
    /// (ties broken by insertion order).
    pub fn pop_due(&mut self, now: Instant) -> Vec<usize> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked Some above");
            if self.cancelled.contains(&entry.id) {
                continue;
            }
            fired.push(entry.callback_addr);
            if entry.is_interval {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.heap.push(TimerEntry {
                    deadline: now + entry.interval,
                    seq,
                    ..entry
                });
            }
        }
        fired
    }

    /// True once every remaining entry is cancelled (spec.md §4.8: a
    /// task may not complete while its timer heap contains a
    /// non-cancelled timer).
    pub fn only_cancelled_remain(&self) -> bool {
        self.heap.iter().all(|e| self.cancelled.contains(&e.id))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|e| !self.cancelled.contains(&e.id))
            .map(|e| e.deadline)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_earliest_deadline_first() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        heap.schedule(now + Duration::from_millis(100), 0xB, false, Duration::ZERO);
        heap.schedule(now + Duration::from_millis(50), 0xA, false, Duration::ZERO);
        let fired = heap.pop_due(now + Duration::from_millis(200));
        assert_eq!(fired, vec![0xA, 0xB]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let deadline = now + Duration::from_millis(10);
        heap.schedule(deadline, 0x1, false, Duration::ZERO);
        heap.schedule(deadline, 0x2, false, Duration::ZERO);
        let fired = heap.pop_due(deadline);
        assert_eq!(fired, vec![0x1, 0x2]);
    }

    #[test]
    fn cancelled_timer_is_skipped_not_removed_eagerly() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let id = heap.schedule(now, 0xDEAD, false, Duration::ZERO);
        assert!(!heap.is_empty());
        heap.cancel(id);
        assert!(!heap.is_empty());
        let fired = heap.pop_due(now);
        assert!(fired.is_empty());
    }

    #[test]
    fn interval_timer_reinserts_with_updated_deadline() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        heap.schedule(now, 0x1, true, Duration::from_millis(10));
        let fired = heap.pop_due(now);
        assert_eq!(fired, vec![0x1]);
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(10)));
    }

    #[test]
    fn only_cancelled_remain_is_true_once_every_entry_is_cancelled() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let id = heap.schedule(now + Duration::from_secs(1), 0x1, false, Duration::ZERO);
        assert!(!heap.only_cancelled_remain());
        heap.cancel(id);
        assert!(heap.only_cancelled_remain());
    }
}
