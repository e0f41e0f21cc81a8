//! Deadline scheduling for the tempo runtime
//!
//! Two timer list implementations share one interface:
//!
//! ```text
//!                      TimerList (trait)
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!      ShardedTimerList            SlackedTimerList
//!   (precise, heap+overflow)    (coarse, tick buckets)
//!              ▲                           ▲
//!              │                           │
//!        RPC deadlines              TimerTrain (periodic
//!        and retries                housekeeping driver)
//! ```
//!
//! Callers `init` a timer with a deadline and a closure; some thread
//! periodically calls `check`, which returns the closures whose deadline
//! passed. No closure ever runs while an internal lock is held.

mod entry;
mod heap;
mod sharded;
mod slacked;
mod train;

pub use entry::Timer;
pub use sharded::ShardedTimerList;
pub use slacked::{SlackedOptions, SlackedTimerList};
pub use train::{TimerTrain, TrainOptions};

use tempo_core::{Duration, TaskCallback, TimerHost, Timestamp};

/// Common interface of the sharded and slacked timer lists.
///
/// Implementations are thread-safe: any thread may init, cancel or check
/// concurrently.
pub trait TimerList: Send + Sync {
    /// Schedule `callback` to run once `deadline` passes.
    ///
    /// The callback runs when some caller's `check` collects it, unless the
    /// timer is cancelled first. Behavior is undefined for a deadline of
    /// [`Timestamp::INFINITE_FUTURE`].
    fn init(&self, deadline: Timestamp, callback: TaskCallback) -> Timer;

    /// Cancel a timer.
    ///
    /// Returns false if the timer cannot be cancelled because it already
    /// fired or its callback is being collected right now; in that case the
    /// callback is guaranteed to run. Returns true otherwise, and the
    /// callback will never run.
    fn cancel(&self, timer: &Timer) -> bool;

    /// Push a pending timer's deadline `delay` later.
    ///
    /// Returns false if the timer already fired.
    fn extend(&self, timer: &Timer, delay: Duration) -> bool;

    /// Collect the callbacks of every expired timer.
    ///
    /// Returns `None` if another thread is already checking (the returned
    /// callbacks of *that* check cover this caller's timers too). Otherwise
    /// returns the expired callbacks, possibly empty, which the caller
    /// *must* run or deliberately drop.
    ///
    /// If `next` is given, it is moved earlier to the soonest remaining
    /// deadline when that is sooner than its current value. It is a hint,
    /// not a guarantee.
    fn check(&self, next: Option<&mut Timestamp>) -> Option<Vec<TaskCallback>>;
}

// ============================================================================
// Time utilities
// ============================================================================

/// Current monotonic time in milliseconds since the process epoch.
///
/// Uses a process-wide start point so all components agree on the epoch.
#[inline]
pub fn now_ms() -> i64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as i64
}

/// Default host: process-epoch monotonic clock, no-op kick.
///
/// Suitable when some thread polls `check` on its own cadence (as the timer
/// train does) and nothing blocks waiting for the next deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl TimerHost for SystemHost {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(now_ms())
    }

    fn kick(&self) {}
}

// ============================================================================
// Test support
// ============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tempo_core::{TaskCallback, TimerHost, Timestamp};

    /// Host with a manually advanced clock, for deterministic tests.
    pub struct TestHost {
        now_ms: AtomicI64,
        kicks: AtomicUsize,
    }

    impl TestHost {
        pub fn new() -> Arc<TestHost> {
            Arc::new(TestHost {
                now_ms: AtomicI64::new(0),
                kicks: AtomicUsize::new(0),
            })
        }

        pub fn set_now(&self, millis: i64) {
            self.now_ms.store(millis, Ordering::SeqCst);
        }

        pub fn kicks(&self) -> usize {
            self.kicks.load(Ordering::SeqCst)
        }
    }

    impl TimerHost for TestHost {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.now_ms.load(Ordering::SeqCst))
        }

        fn kick(&self) {
            self.kicks.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record of which tagged callbacks have run.
    #[derive(Clone, Default)]
    pub struct FiredLog {
        fired: Arc<Mutex<Vec<u32>>>,
    }

    impl FiredLog {
        pub fn callback(&self, tag: u32) -> TaskCallback {
            let fired = self.fired.clone();
            Box::new(move || fired.lock().unwrap().push(tag))
        }

        pub fn fired(&self) -> Vec<u32> {
            self.fired.lock().unwrap().clone()
        }

        pub fn sorted(&self) -> Vec<u32> {
            let mut v = self.fired();
            v.sort_unstable();
            v
        }
    }

    /// Run every callback in a `check` result.
    pub fn run_all(callbacks: Vec<TaskCallback>) -> usize {
        let n = callbacks.len();
        for cb in callbacks {
            cb();
        }
        n
    }

    use std::collections::{HashMap, VecDeque};
    use tempo_core::{Duration, TaskHandle, WorkerPool};

    /// Worker pool driven by hand: nothing runs until `advance` is called,
    /// and delayed tasks fire against the [`TestHost`] clock. Makes train
    /// tests fully deterministic.
    pub struct ManualPool {
        host: Arc<TestHost>,
        state: Mutex<ManualPoolState>,
    }

    struct ManualPoolState {
        next_id: u64,
        ready: VecDeque<TaskCallback>,
        delayed: HashMap<u64, (Timestamp, TaskCallback)>,
    }

    impl ManualPool {
        pub fn new(host: Arc<TestHost>) -> Arc<ManualPool> {
            Arc::new(ManualPool {
                host,
                state: Mutex::new(ManualPoolState {
                    next_id: 1,
                    ready: VecDeque::new(),
                    delayed: HashMap::new(),
                }),
            })
        }

        /// Run ready callbacks and due delayed callbacks until none remain.
        /// Returns how many ran.
        pub fn advance(&self) -> usize {
            let mut ran = 0;
            loop {
                let now = self.host.now();
                let task = {
                    let mut state = self.state.lock().unwrap();
                    if let Some(cb) = state.ready.pop_front() {
                        Some(cb)
                    } else {
                        let due = state
                            .delayed
                            .iter()
                            .filter(|(_, (at, _))| *at <= now)
                            .map(|(id, _)| *id)
                            .min();
                        due.map(|id| state.delayed.remove(&id).unwrap().1)
                    }
                };
                match task {
                    Some(cb) => {
                        cb();
                        ran += 1;
                    }
                    None => return ran,
                }
            }
        }
    }

    impl WorkerPool for ManualPool {
        fn run(&self, callback: TaskCallback) {
            self.state.lock().unwrap().ready.push_back(callback);
        }

        fn run_after(&self, delay: Duration, callback: TaskCallback) -> TaskHandle {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            let due = self.host.now() + delay;
            state.delayed.insert(id, (due, callback));
            TaskHandle { keys: [id, 0] }
        }

        fn cancel(&self, handle: TaskHandle) -> bool {
            self.state
                .lock()
                .unwrap()
                .delayed
                .remove(&handle.keys[0])
                .is_some()
        }
    }
}
