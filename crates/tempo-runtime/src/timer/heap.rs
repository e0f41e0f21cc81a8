//! Binary min-heap of timers with position back-pointers
//!
//! A plain array-backed min-heap ordered by deadline, with one twist: every
//! timer records its current heap index, so removing an arbitrary timer
//! (cancellation) is O(log n) instead of O(n).
//!
//! # Complexity
//!
//! - Add: O(log n)
//! - Remove arbitrary timer: O(log n)
//! - Top: O(1)
//!
//! Not thread-safe: the owning shard's mutex must be held across every
//! operation.

use std::sync::Arc;

use super::entry::{Slot, TimerState};

pub(crate) struct TimerHeap {
    timers: Vec<Arc<TimerState>>,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Insert a timer. Returns true iff it became the new root, i.e. the
    /// shard's minimum deadline decreased.
    pub(crate) fn add(&mut self, timer: Arc<TimerState>) -> bool {
        timer.set_slot(Slot::Heap);
        let i = self.timers.len();
        self.timers.push(timer.clone());
        self.adjust_upwards(i, timer.clone());
        timer.index() == 0
    }

    pub(crate) fn remove(&mut self, timer: &TimerState) {
        let i = timer.index();
        debug_assert!(i < self.timers.len());
        debug_assert!(std::ptr::eq(self.timers[i].as_ref(), timer));
        timer.set_slot(Slot::Detached);
        if i == self.timers.len() - 1 {
            self.timers.pop();
            return;
        }
        let last = self.timers.pop().unwrap();
        self.timers[i] = last;
        self.timers[i].set_index(i);
        self.note_changed_priority(i);
    }

    pub(crate) fn top(&self) -> Option<&Arc<TimerState>> {
        self.timers.first()
    }

    pub(crate) fn pop(&mut self) {
        if let Some(top) = self.timers.first() {
            let top = top.clone();
            self.remove(&top);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    #[cfg(test)]
    pub(crate) fn timers(&self) -> &[Arc<TimerState>] {
        &self.timers
    }

    /// Move the hole at `i` toward the root until `timer` fits, then place
    /// it there.
    fn adjust_upwards(&mut self, mut i: usize, timer: Arc<TimerState>) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.timers[parent].deadline() <= timer.deadline() {
                break;
            }
            self.timers[i] = self.timers[parent].clone();
            self.timers[i].set_index(i);
            i = parent;
        }
        timer.set_index(i);
        self.timers[i] = timer;
    }

    /// Move the hole at `i` away from the root until `timer` fits, then
    /// place it there.
    fn adjust_downwards(&mut self, mut i: usize, timer: Arc<TimerState>) {
        loop {
            let left = 2 * i + 1;
            if left >= self.timers.len() {
                break;
            }
            let right = left + 1;
            let next = if right < self.timers.len()
                && self.timers[left].deadline() > self.timers[right].deadline()
            {
                right
            } else {
                left
            };
            if timer.deadline() <= self.timers[next].deadline() {
                break;
            }
            self.timers[i] = self.timers[next].clone();
            self.timers[i].set_index(i);
            i = next;
        }
        timer.set_index(i);
        self.timers[i] = timer;
    }

    /// Re-sift the element at `i` after its priority changed, in whichever
    /// direction is needed.
    fn note_changed_priority(&mut self, i: usize) {
        let timer = self.timers[i].clone();
        if i > 0 {
            let parent = (i - 1) / 2;
            if self.timers[parent].deadline() > timer.deadline() {
                self.adjust_upwards(i, timer);
                return;
            }
        }
        self.adjust_downwards(i, timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::Timestamp;

    fn make(deadline_ms: i64) -> Arc<TimerState> {
        TimerState::new(Timestamp::from_millis(deadline_ms), Box::new(|| {}))
    }

    fn assert_back_pointers(heap: &TimerHeap) {
        for (i, t) in heap.timers.iter().enumerate() {
            assert_eq!(t.index(), i);
            assert_eq!(t.slot(), Slot::Heap);
        }
    }

    #[test]
    fn test_add_reports_new_root() {
        let mut heap = TimerHeap::new();
        assert!(heap.add(make(100)));
        assert!(!heap.add(make(200)));
        assert!(heap.add(make(50)));
        assert_eq!(heap.top().unwrap().deadline().as_millis(), 50);
        assert_back_pointers(&heap);
    }

    #[test]
    fn test_pop_yields_deadline_order() {
        let mut heap = TimerHeap::new();
        for d in [30, 10, 50, 20, 40] {
            heap.add(make(d));
        }
        let mut seen = Vec::new();
        while let Some(top) = heap.top() {
            seen.push(top.deadline().as_millis());
            heap.pop();
        }
        assert_eq!(seen, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_remove_arbitrary() {
        let mut heap = TimerHeap::new();
        let timers: Vec<_> = [30, 10, 50, 20, 40].iter().map(|d| make(*d)).collect();
        for t in &timers {
            heap.add(t.clone());
        }
        // Remove an interior element and the current root.
        heap.remove(&timers[3]); // 20
        heap.remove(&timers[1]); // 10
        assert_back_pointers(&heap);
        assert_eq!(heap.top().unwrap().deadline().as_millis(), 30);
        assert_eq!(heap.len(), 3);
        assert_eq!(timers[3].slot(), Slot::Detached);
    }

    #[test]
    fn test_remove_tail_is_trivial() {
        let mut heap = TimerHeap::new();
        let a = make(10);
        let b = make(20);
        heap.add(a.clone());
        heap.add(b.clone());
        heap.remove(&b);
        assert_eq!(heap.len(), 1);
        assert_back_pointers(&heap);
    }

    #[test]
    fn test_removed_tail_resifts_both_directions() {
        // Force the swapped-in tail to need an upward move: remove a deep
        // element whose replacement is smaller than its new parent.
        let mut heap = TimerHeap::new();
        let timers: Vec<_> = [10, 100, 20, 110, 120, 30, 40, 115].iter().map(|d| make(*d)).collect();
        for t in &timers {
            heap.add(t.clone());
        }
        heap.remove(&timers[4]); // 120: the swapped-in tail (115) sifts down
        heap.remove(&timers[3]); // 110: the swapped-in tail (40) sifts up
        assert_back_pointers(&heap);
        let mut seen = Vec::new();
        while let Some(top) = heap.top() {
            seen.push(top.deadline().as_millis());
            heap.pop();
        }
        assert_eq!(seen, vec![10, 20, 30, 40, 100, 115]);
    }
}
