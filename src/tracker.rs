//! Per-invocation concurrent barrier tracking completed predecessors per
//! node. Safe for concurrent callers: counters are atomic, `scheduled` and
//! `reached` are compare-and-swap guarded so a node is claimed exactly
//! once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Bookkeeping for one flow invocation, indexed by the node's position in
/// its flow's `nodes` vector.
pub struct Tracker {
    pending: Vec<AtomicUsize>,
    scheduled: Vec<AtomicBool>,
    reached: Vec<AtomicBool>,
}

impl Tracker {
    /// `previous_counts[i]` is `len(node[i].Previous)`.
    pub fn new(previous_counts: &[usize]) -> Self {
        Tracker {
            pending: previous_counts.iter().map(|&n| AtomicUsize::new(n)).collect(),
            scheduled: previous_counts.iter().map(|_| AtomicBool::new(false)).collect(),
            reached: previous_counts.iter().map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// `Met(node) -> bool`: true iff the count of completed predecessors
    /// equals `len(node.Previous)`, i.e. the pending counter has hit zero.
    pub fn met(&self, node: usize) -> bool {
        self.pending[node].load(Ordering::SeqCst) == 0
    }

    /// Decrements `node`'s pending-predecessor counter by one (called once
    /// per completed predecessor) and returns the counter's new value.
    pub fn decrement(&self, node: usize) -> usize {
        self.pending[node].fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Atomically claims the right to schedule `node`'s task. Only the
    /// caller that flips this from `false` to `true` should spawn it —
    /// this is the "skip any already scheduled" guard from the Manager's
    /// fan-out step.
    pub fn try_schedule(&self, node: usize) -> bool {
        self.scheduled[node]
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `Reached(node) -> bool`: whether the node itself has been marked
    /// complete.
    pub fn reached(&self, node: usize) -> bool {
        self.reached[node].load(Ordering::SeqCst)
    }

    pub fn mark_reached(&self, node: usize) {
        self.reached[node].store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_is_met_once_pending_hits_zero() {
        let tracker = Tracker::new(&[0, 2]);
        assert!(tracker.met(0));
        assert!(!tracker.met(1));

        assert_eq!(tracker.decrement(1), 1);
        assert!(!tracker.met(1));
        assert_eq!(tracker.decrement(1), 0);
        assert!(tracker.met(1));
    }

    #[test]
    fn try_schedule_only_succeeds_once() {
        let tracker = Tracker::new(&[0]);
        assert!(tracker.try_schedule(0));
        assert!(!tracker.try_schedule(0));
    }

    #[test]
    fn reached_starts_false_and_latches_true() {
        let tracker = Tracker::new(&[0]);
        assert!(!tracker.reached(0));
        tracker.mark_reached(0);
        assert!(tracker.reached(0));
    }
}
