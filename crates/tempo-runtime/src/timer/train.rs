//! Timer train
//!
//! A periodic driver over a [`SlackedTimerList`]. Every `period` the train
//! runs a step: collect expired timers, dispatch their closures to the
//! worker pool, and re-schedule the next step on the same pool. Callers get
//! a cheap `run_after`/`cancel`/`extend` surface without owning a thread.
//!
//! Handles are two 64-bit words: a unique closure id, and the shard index
//! packed with an ABA token. A handle whose entry has been consumed (fired,
//! cancelled, or the slot reused) simply misses in the shard's known-handle
//! map, so stale cancels are rejected instead of killing a stranger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tempo_core::{Duration, TaskCallback, TaskHandle, TimerHost, WorkerPool};

use super::entry::default_shard_count;
use super::slacked::{SlackedOptions, SlackedTimerList};
use super::{Timer, TimerList};

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Step period; doubles as the slacked list's resolution.
    pub period: Duration,
    /// Shard count for the known-handle maps; 0 picks the default.
    pub num_shards: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            num_shards: 0,
        }
    }
}

struct TrainShard {
    known: Mutex<HashMap<TaskHandle, Timer>>,
}

struct TrainControl {
    shutdown: bool,
    tick_handle: TaskHandle,
}

struct TrainInner {
    host: Arc<dyn TimerHost>,
    pool: Arc<dyn WorkerPool>,
    timer_list: SlackedTimerList,
    period: Duration,
    shards: Box<[TrainShard]>,
    aba_token: AtomicU32,
    next_closure_id: AtomicU64,
    control: Mutex<TrainControl>,
}

impl TrainInner {
    fn shard_of(&self, handle: TaskHandle) -> Option<&TrainShard> {
        let idx = (handle.keys[1] >> 32) as usize;
        self.shards.get(idx)
    }
}

/// One step: drain the timer list and re-arm the next tick.
///
/// Runs under the control mutex so that shutdown is observed even when a
/// tick was already in flight when the handle got cancelled.
fn execute_step(inner: &Arc<TrainInner>) {
    let mut control = inner.control.lock().unwrap();
    if control.shutdown {
        return;
    }
    let mut next = inner.host.now();
    let expired = inner
        .timer_list
        .check(Some(&mut next))
        .expect("timer train step raced another checker");
    for callback in expired {
        inner.pool.run(callback);
    }
    let weak = Arc::downgrade(inner);
    control.tick_handle = inner
        .pool
        .run_after(inner.period, Box::new(move || resume_step(&weak)));
}

fn resume_step(weak: &Weak<TrainInner>) {
    if let Some(inner) = weak.upgrade() {
        execute_step(&inner);
    }
}

/// Periodic closure scheduler backed by a slacked timer list.
pub struct TimerTrain {
    inner: Arc<TrainInner>,
}

impl TimerTrain {
    pub fn new(host: Arc<dyn TimerHost>, pool: Arc<dyn WorkerPool>, options: TrainOptions) -> Self {
        let num_shards = if options.num_shards < 1 {
            default_shard_count()
        } else {
            options.num_shards
        };
        let timer_list = SlackedTimerList::new(
            host.clone(),
            SlackedOptions {
                num_shards,
                resolution: options.period,
            },
        );
        let shards = (0..num_shards)
            .map(|_| TrainShard {
                known: Mutex::new(HashMap::new()),
            })
            .collect();
        let inner = Arc::new(TrainInner {
            host,
            pool,
            timer_list,
            period: options.period,
            shards,
            aba_token: AtomicU32::new(0),
            next_closure_id: AtomicU64::new(1),
            control: Mutex::new(TrainControl {
                shutdown: false,
                tick_handle: TaskHandle::INVALID,
            }),
        });
        // First departure.
        {
            let weak = Arc::downgrade(&inner);
            let mut control = inner.control.lock().unwrap();
            control.tick_handle = inner
                .pool
                .run_after(inner.period, Box::new(move || resume_step(&weak)));
        }
        TimerTrain { inner }
    }

    /// Schedule `callback` to run roughly `delay` from now, quantized to
    /// the train's period.
    pub fn run_after(&self, delay: Duration, callback: TaskCallback) -> TaskHandle {
        let inner = &self.inner;
        let id = inner.next_closure_id.fetch_add(1, Ordering::Relaxed);
        let shard_idx =
            (id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize % inner.shards.len();
        let aba = u64::from(inner.aba_token.fetch_add(1, Ordering::Relaxed));
        let handle = TaskHandle {
            keys: [id, ((shard_idx as u64) << 32) | aba],
        };

        let when = inner.host.now() + delay;
        let weak = Arc::downgrade(inner);
        let wrapped: TaskCallback = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.shards[shard_idx]
                    .known
                    .lock()
                    .unwrap()
                    .remove(&handle);
            }
            callback();
        });

        // The shard lock spans both the list insert and the map insert, so
        // a step collecting this timer blocks on the map removal until the
        // handle is actually there.
        let mut known = inner.shards[shard_idx].known.lock().unwrap();
        let timer = inner.timer_list.init(when, wrapped);
        known.insert(handle, timer);
        handle
    }

    /// Cancel a scheduled closure. Returns false for fired, already
    /// cancelled, or stale handles; false means the closure runs (or ran).
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let Some(shard) = self.inner.shard_of(handle) else {
            return false;
        };
        let mut known = shard.known.lock().unwrap();
        let Some(timer) = known.remove(&handle) else {
            return false;
        };
        self.inner.timer_list.cancel(&timer)
    }

    /// Push a scheduled closure's deadline `delay` later. Returns false if
    /// the closure already fired or the handle is stale.
    pub fn extend(&self, handle: TaskHandle, delay: Duration) -> bool {
        let Some(shard) = self.inner.shard_of(handle) else {
            return false;
        };
        let known = shard.known.lock().unwrap();
        let Some(timer) = known.get(&handle) else {
            return false;
        };
        self.inner.timer_list.extend(timer, delay)
    }

    /// Stop the train: cancel the next tick and mark shutdown so an
    /// in-flight tick becomes a no-op. Pending closures are freed, not run,
    /// when the train's last reference drops. Idempotent.
    pub fn shutdown(&self) {
        let mut control = self.inner.control.lock().unwrap();
        if control.shutdown {
            return;
        }
        control.shutdown = true;
        self.inner.pool.cancel(control.tick_handle);
        log::debug!("timer train stopped");
    }
}

impl Drop for TimerTrain {
    fn drop(&mut self) {
        self.shutdown();
    }
}
