//! Sharded timer list
//!
//! The precise deadline scheduler. Contention on the priority structure is
//! the dominant cost, so timers are spread across shards by hashing their
//! state address; each shard has its own mutex.
//!
//! Within a shard, only "imminent" timers (deadline below the shard's
//! rolling `queue_deadline_cap`) live in the ordered heap. Everything
//! further out is dumped into an unordered overflow vector: most far-future
//! timers get cancelled or extended before they matter, and ordering them
//! eagerly would be wasted work. When the heap drains, the shard *refills*:
//! the cap advances by a clamped multiple of the observed average
//! insert-distance and eligible overflow timers migrate into the heap.
//!
//! An outer mutex keeps the shards sorted by their minimum deadline, and an
//! atomic snapshot of the overall minimum lets `check` return without any
//! lock at all in the common "nothing due yet" case.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use tempo_core::{Duration, TaskCallback, TimerHost, Timestamp};

use super::entry::{default_shard_count, shard_index, Slot, TimerState};
use super::heap::TimerHeap;
use super::{Timer, TimerList};
use crate::stats::TimeAveragedStats;

/// Scale from average insert-distance to refill window width.
const ADD_DEADLINE_SCALE: f64 = 0.33;
/// Bounds on the refill window, in seconds.
const MIN_QUEUE_WINDOW: f64 = 0.01;
const MAX_QUEUE_WINDOW: f64 = 1.0;

/// Distinguishes an empty shard's published minimum from a real deadline.
const EMPTY_SHARD_EPSILON: Duration = Duration::from_millis(1);

/// Unordered holding pen for timers beyond the shard's deadline cap.
///
/// Each timer records its vector position, so removal is a swap-remove.
struct OverflowList {
    timers: Vec<Arc<TimerState>>,
}

impl OverflowList {
    fn new() -> Self {
        Self { timers: Vec::new() }
    }

    fn add(&mut self, timer: Arc<TimerState>) {
        timer.set_slot(Slot::Overflow);
        timer.set_index(self.timers.len());
        self.timers.push(timer);
    }

    fn remove(&mut self, timer: &TimerState) {
        let i = timer.index();
        debug_assert!(std::ptr::eq(self.timers[i].as_ref(), timer));
        timer.set_slot(Slot::Detached);
        self.timers.swap_remove(i);
        if i < self.timers.len() {
            self.timers[i].set_index(i);
        }
    }
}

/// Per-shard state, all guarded by one mutex.
struct ShardCore {
    stats: TimeAveragedStats,
    /// All and only timers with deadlines below this are in the heap.
    queue_deadline_cap: Timestamp,
    heap: TimerHeap,
    overflow: OverflowList,
}

impl ShardCore {
    fn new(start: Timestamp) -> Self {
        Self {
            stats: TimeAveragedStats::new(1.0 / ADD_DEADLINE_SCALE, 0.1, 0.5),
            queue_deadline_cap: start,
            heap: TimerHeap::new(),
            overflow: OverflowList::new(),
        }
    }

    fn compute_min_deadline(&self) -> Timestamp {
        match self.heap.top() {
            Some(top) => top.deadline(),
            None => self.queue_deadline_cap + EMPTY_SHARD_EPSILON,
        }
    }

    /// Advance the deadline cap and migrate now-imminent overflow timers
    /// into the heap. Returns true iff the heap ends up non-empty.
    fn refill_heap(&mut self, now: Timestamp) -> bool {
        let window = (self.stats.update_average() * ADD_DEADLINE_SCALE)
            .clamp(MIN_QUEUE_WINDOW, MAX_QUEUE_WINDOW);
        self.queue_deadline_cap =
            self.queue_deadline_cap.max(now) + Duration::from_secs_f64(window);

        let cap = self.queue_deadline_cap;
        let mut i = 0;
        while i < self.overflow.timers.len() {
            if self.overflow.timers[i].deadline() < cap {
                let timer = self.overflow.timers[i].clone();
                self.overflow.remove(&timer);
                self.heap.add(timer);
            } else {
                i += 1;
            }
        }
        !self.heap.is_empty()
    }

    /// Pop the next timer with deadline <= now, refilling as needed.
    /// Clears the timer's pending flag, committing it to fire.
    fn pop_one(&mut self, now: Timestamp) -> Option<Arc<TimerState>> {
        loop {
            if self.heap.is_empty() {
                if now < self.queue_deadline_cap {
                    return None;
                }
                if !self.refill_heap(now) {
                    return None;
                }
            }
            let top = self.heap.top().expect("refill said non-empty");
            if top.deadline() > now {
                return None;
            }
            let timer = top.clone();
            timer.pending.store(false, Ordering::Relaxed);
            self.heap.pop();
            return Some(timer);
        }
    }
}

struct Shard {
    core: Mutex<ShardCore>,
}

/// The shards ordered by their minimum deadline, plus that minimum itself.
/// Guarded by the list's outer mutex.
struct ShardQueue {
    /// Shard indices, head = soonest.
    order: Vec<u32>,
    /// Inverse of `order`: position of each shard in it.
    pos: Vec<u32>,
    /// Published minimum deadline of each shard.
    min_deadline: Vec<Timestamp>,
}

impl ShardQueue {
    fn head(&self) -> usize {
        self.order[0] as usize
    }

    fn swap_adjacent(&mut self, first_pos: usize) {
        self.order.swap(first_pos, first_pos + 1);
        self.pos[self.order[first_pos] as usize] = first_pos as u32;
        self.pos[self.order[first_pos + 1] as usize] = first_pos as u32 + 1;
    }

    /// Re-sort after one shard's minimum changed: bubble it toward the head
    /// while smaller than its predecessor, sink while larger than its
    /// successor.
    fn note_deadline_change(&mut self, shard: usize) {
        loop {
            let p = self.pos[shard] as usize;
            if p == 0 {
                break;
            }
            let prev = self.order[p - 1] as usize;
            if self.min_deadline[shard] >= self.min_deadline[prev] {
                break;
            }
            self.swap_adjacent(p - 1);
        }
        loop {
            let p = self.pos[shard] as usize;
            if p + 1 >= self.order.len() {
                break;
            }
            let next = self.order[p + 1] as usize;
            if self.min_deadline[shard] <= self.min_deadline[next] {
                break;
            }
            self.swap_adjacent(p);
        }
    }
}

/// Concurrent, sharded deadline scheduler.
///
/// See the module docs for the design. Deadline ordering is strict within a
/// shard and best-effort across shards: `check` drains whole shards at a
/// time to reduce lock churn, which is acceptable because no cross-shard
/// ordering is promised.
pub struct ShardedTimerList {
    host: Arc<dyn TimerHost>,
    shards: Box<[Shard]>,
    queue: Mutex<ShardQueue>,
    /// Cached overall minimum deadline; the `check` fast path reads only
    /// this.
    min_timer_ms: AtomicI64,
    /// Singleton guard: only one thread drains expired timers at a time.
    checker: Mutex<()>,
}

impl ShardedTimerList {
    /// Create with the default shard count, `clamp(2 * cores, 1, 32)`.
    pub fn new(host: Arc<dyn TimerHost>) -> Self {
        Self::with_shards(host, default_shard_count())
    }

    pub fn with_shards(host: Arc<dyn TimerHost>, num_shards: usize) -> Self {
        assert!(num_shards > 0);
        let start = host.now();
        let shards: Box<[Shard]> = (0..num_shards)
            .map(|_| Shard {
                core: Mutex::new(ShardCore::new(start)),
            })
            .collect();
        let min_deadline: Vec<Timestamp> = shards
            .iter()
            .map(|s| s.core.lock().unwrap().compute_min_deadline())
            .collect();
        ShardedTimerList {
            host,
            shards,
            queue: Mutex::new(ShardQueue {
                order: (0..num_shards as u32).collect(),
                pos: (0..num_shards as u32).collect(),
                min_deadline,
            }),
            min_timer_ms: AtomicI64::new(start.as_millis()),
            checker: Mutex::new(()),
        }
    }

    /// A shard's heap minimum decreased; bubble it in the queue and, if the
    /// overall minimum dropped, publish it and kick the host.
    fn publish_decreased_minimum(&self, shard: usize, deadline: Timestamp) {
        let mut q = self.queue.lock().unwrap();
        if deadline < q.min_deadline[shard] {
            let old_min = q.min_deadline[q.head()];
            q.min_deadline[shard] = deadline;
            q.note_deadline_change(shard);
            if q.head() == shard && deadline < old_min {
                self.min_timer_ms
                    .store(deadline.as_millis(), Ordering::Relaxed);
                self.host.kick();
            }
        }
    }

    fn find_expired_timers(
        &self,
        now: Timestamp,
        next: Option<&mut Timestamp>,
    ) -> Vec<TaskCallback> {
        let min_timer = Timestamp::from_millis(self.min_timer_ms.load(Ordering::Relaxed));
        let mut done = Vec::new();
        if now < min_timer {
            if let Some(next) = next {
                *next = (*next).min(min_timer);
            }
            return done;
        }

        let mut q = self.queue.lock().unwrap();
        while q.min_deadline[q.head()] <= now {
            let head = q.head();
            // Drain as many due timers as the shard has in one pass. This
            // may violate perfect deadline ordering across shards; no such
            // ordering is promised.
            let new_min = {
                let mut core = self.shards[head].core.lock().unwrap();
                while let Some(timer) = core.pop_one(now) {
                    if let Some(cb) = timer.take_callback() {
                        done.push(cb);
                    }
                }
                core.compute_min_deadline()
            };
            // An init() on this shard can slip in right here and lower the
            // minimum again; it will block on the outer mutex and correct
            // the published value after we release it.
            q.min_deadline[head] = new_min;
            q.note_deadline_change(head);
        }

        if let Some(next) = next {
            *next = (*next).min(q.min_deadline[q.head()]);
        }
        self.min_timer_ms
            .store(q.min_deadline[q.head()].as_millis(), Ordering::Relaxed);
        done
    }
}

impl TimerList for ShardedTimerList {
    fn init(&self, deadline: Timestamp, callback: TaskCallback) -> Timer {
        let state = TimerState::new(deadline, callback);
        let idx = shard_index(&state, self.shards.len());
        let mut is_first_timer = false;
        // Clamped for bookkeeping; the stored deadline stays as given so a
        // past-deadline timer still compares <= now and fires immediately.
        let mut effective = deadline;
        {
            let mut core = self.shards[idx].core.lock().unwrap();
            state.pending.store(true, Ordering::Relaxed);
            let now = self.host.now();
            if effective <= now {
                effective = now;
            }
            core.stats.add_sample((effective - now).as_secs_f64());
            if effective < core.queue_deadline_cap {
                is_first_timer = core.heap.add(state.clone());
            } else {
                core.overflow.add(state.clone());
            }
        }
        // The shard lock is released before the outer lock is taken; a
        // racing check() may fire the timer before the queue update lands,
        // which is a safe error (the minimum just gets lowered needlessly).
        if is_first_timer {
            self.publish_decreased_minimum(idx, effective);
        }
        Timer { state }
    }

    fn cancel(&self, timer: &Timer) -> bool {
        let state = &timer.state;
        let idx = shard_index(state, self.shards.len());
        let mut core = self.shards[idx].core.lock().unwrap();
        if !state.pending.load(Ordering::Relaxed) {
            return false;
        }
        state.pending.store(false, Ordering::Relaxed);
        match state.slot() {
            Slot::Heap => core.heap.remove(state),
            Slot::Overflow => core.overflow.remove(state),
            slot => unreachable!("pending timer in {slot:?}"),
        }
        true
    }

    fn extend(&self, timer: &Timer, delay: Duration) -> bool {
        let state = &timer.state;
        let idx = shard_index(state, self.shards.len());
        let mut is_first_timer = false;
        let new_deadline;
        {
            let mut core = self.shards[idx].core.lock().unwrap();
            if !state.pending.load(Ordering::Relaxed) {
                return false;
            }
            match state.slot() {
                Slot::Heap => core.heap.remove(state),
                Slot::Overflow => core.overflow.remove(state),
                slot => unreachable!("pending timer in {slot:?}"),
            }
            new_deadline = state.deadline() + delay;
            state.set_deadline(new_deadline);
            if new_deadline < core.queue_deadline_cap {
                is_first_timer = core.heap.add(state.clone());
            } else {
                core.overflow.add(state.clone());
            }
            // A deadline that moved *later* can leave a stale, too-small
            // published minimum; the next check() recomputes and heals it.
        }
        if is_first_timer {
            self.publish_decreased_minimum(idx, new_deadline);
        }
        true
    }

    fn check(&self, next: Option<&mut Timestamp>) -> Option<Vec<TaskCallback>> {
        let now = self.host.now();

        // Fast path: one relaxed load, no locks, when nothing is due.
        let min_timer = Timestamp::from_millis(self.min_timer_ms.load(Ordering::Relaxed));
        if now < min_timer {
            if let Some(next) = next {
                *next = (*next).min(min_timer);
            }
            return Some(Vec::new());
        }

        let _guard = match self.checker.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(_)) => return None,
        };
        Some(self.find_expired_timers(now, next))
    }
}
