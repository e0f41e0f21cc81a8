//! Slacked timer list
//!
//! For large populations of timers that tolerate coarse rounding
//! (keepalives, deferred cleanup) bucketing beats ordering. Deadlines are
//! rounded up to a tick index, `ceil(deadline / resolution)`; all timers in
//! a bucket fire together, and a check fires every bucket whose tick has
//! been reached by the clock rounded to the *nearest* tick. A bucket may
//! therefore fire up to half a resolution before its rounded-up boundary,
//! which is exactly the slack the caller signed up for.
//!
//! Cancellation is O(1): the timer remembers its bucket and its position in
//! it. Shards are selected by timer address hash, as in the sharded list.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

use tempo_core::{Duration, TaskCallback, TimerHost, Timestamp};

use super::entry::{default_shard_count, shard_index, Slot, TimerState};
use super::{Timer, TimerList};

#[derive(Debug, Clone)]
pub struct SlackedOptions {
    pub num_shards: usize,
    /// Bucket width. Deadlines are rounded up to multiples of this.
    pub resolution: Duration,
}

impl Default for SlackedOptions {
    fn default() -> Self {
        Self {
            num_shards: default_shard_count(),
            resolution: Duration::from_secs(1),
        }
    }
}

/// Per-shard state: tick -> bucket, plus a min-heap of ticks.
///
/// The tick heap is pruned lazily: cancelling the last timer of a bucket
/// removes the bucket but leaves its tick in the heap, where `check` skips
/// it once no bucket matches.
struct SlackedCore {
    active_ticks: BinaryHeap<Reverse<u64>>,
    buckets: HashMap<u64, Vec<Arc<TimerState>>>,
}

struct SlackedShard {
    core: Mutex<SlackedCore>,
}

/// Coarse, bucketed timer list.
pub struct SlackedTimerList {
    host: Arc<dyn TimerHost>,
    resolution_ms: i64,
    shards: Box<[SlackedShard]>,
}

impl SlackedTimerList {
    pub fn new(host: Arc<dyn TimerHost>, options: SlackedOptions) -> Self {
        assert!(options.num_shards > 0);
        let resolution_ms = options.resolution.as_millis();
        assert!(resolution_ms > 0, "resolution must be positive");
        let shards = (0..options.num_shards)
            .map(|_| SlackedShard {
                core: Mutex::new(SlackedCore {
                    active_ticks: BinaryHeap::new(),
                    buckets: HashMap::new(),
                }),
            })
            .collect();
        SlackedTimerList {
            host,
            resolution_ms,
            shards,
        }
    }

    /// Bucket index for a deadline: round up to the next tick boundary.
    fn tick_for(&self, deadline: Timestamp) -> u64 {
        let millis = deadline.as_millis().max(0) as u64;
        millis.div_ceil(self.resolution_ms as u64)
    }

    /// The last tick considered due at `now`: nearest tick to the clock.
    fn due_tick(&self, now: Timestamp) -> u64 {
        let millis = now.as_millis().max(0);
        ((millis + self.resolution_ms / 2) / self.resolution_ms) as u64
    }

    fn insert_locked(core: &mut SlackedCore, tick: u64, state: Arc<TimerState>) {
        state.set_slot(Slot::Bucket);
        state.tick.store(tick, std::sync::atomic::Ordering::Relaxed);
        let SlackedCore {
            active_ticks,
            buckets,
        } = core;
        let bucket = buckets.entry(tick).or_insert_with(|| {
            active_ticks.push(Reverse(tick));
            Vec::new()
        });
        state.set_index(bucket.len());
        bucket.push(state);
    }

    fn remove_locked(core: &mut SlackedCore, state: &TimerState) {
        let tick = state.tick.load(std::sync::atomic::Ordering::Relaxed);
        let bucket = core
            .buckets
            .get_mut(&tick)
            .expect("pending timer without bucket");
        let i = state.index();
        debug_assert!(std::ptr::eq(bucket[i].as_ref(), state));
        bucket.swap_remove(i);
        if i < bucket.len() {
            bucket[i].set_index(i);
        }
        if bucket.is_empty() {
            // The tick stays in the heap; check() skips bucket-less ticks.
            core.buckets.remove(&tick);
        }
        state.set_slot(Slot::Detached);
    }
}

impl TimerList for SlackedTimerList {
    fn init(&self, deadline: Timestamp, callback: TaskCallback) -> Timer {
        let state = TimerState::new(deadline, callback);
        let idx = shard_index(&state, self.shards.len());
        let tick = self.tick_for(deadline);
        {
            let mut core = self.shards[idx].core.lock().unwrap();
            state
                .pending
                .store(true, std::sync::atomic::Ordering::Relaxed);
            Self::insert_locked(&mut core, tick, state.clone());
        }
        Timer { state }
    }

    fn cancel(&self, timer: &Timer) -> bool {
        let state = &timer.state;
        let idx = shard_index(state, self.shards.len());
        let mut core = self.shards[idx].core.lock().unwrap();
        if !state.pending.load(std::sync::atomic::Ordering::Relaxed) {
            return false;
        }
        state
            .pending
            .store(false, std::sync::atomic::Ordering::Relaxed);
        Self::remove_locked(&mut core, state);
        true
    }

    fn extend(&self, timer: &Timer, delay: Duration) -> bool {
        let state = &timer.state;
        let idx = shard_index(state, self.shards.len());
        let mut core = self.shards[idx].core.lock().unwrap();
        if !state.pending.load(std::sync::atomic::Ordering::Relaxed) {
            return false;
        }
        Self::remove_locked(&mut core, state);
        let new_deadline = state.deadline() + delay;
        state.set_deadline(new_deadline);
        let tick = self.tick_for(new_deadline);
        Self::insert_locked(&mut core, tick, state.clone());
        true
    }

    fn check(&self, next: Option<&mut Timestamp>) -> Option<Vec<TaskCallback>> {
        let now = self.host.now();
        let due = self.due_tick(now);
        let mut out = Vec::new();
        let mut soonest_tick: Option<u64> = None;

        for shard in self.shards.iter() {
            let mut core = shard.core.lock().unwrap();
            loop {
                let Some(&Reverse(tick)) = core.active_ticks.peek() else {
                    break;
                };
                if !core.buckets.contains_key(&tick) {
                    // Cancelled away; discard the stale heap entry.
                    core.active_ticks.pop();
                    continue;
                }
                if tick > due {
                    soonest_tick = Some(soonest_tick.map_or(tick, |t| t.min(tick)));
                    break;
                }
                core.active_ticks.pop();
                let bucket = core.buckets.remove(&tick).unwrap();
                for state in bucket {
                    state
                        .pending
                        .store(false, std::sync::atomic::Ordering::Relaxed);
                    state.set_slot(Slot::Detached);
                    if let Some(cb) = state.take_callback() {
                        out.push(cb);
                    }
                }
            }
        }

        if let (Some(next), Some(tick)) = (next, soonest_tick) {
            let at = Timestamp::from_millis(tick as i64 * self.resolution_ms);
            *next = (*next).min(at);
        }
        Some(out)
    }
}
