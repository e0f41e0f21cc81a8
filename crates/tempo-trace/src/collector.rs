//! Z-trace collector
//!
//! The collector itself is nearly free until somebody looks: the impl is
//! created lazily on the first [`ZTraceCollector::make_ztrace`], and
//! `append` bails on an atomic live-count before invoking the producer.
//!
//! One mutex guards the live observer map, held only across append,
//! insertion and removal. Removal from the map is the single termination
//! point - completion by predicate, deadline expiry and collector teardown
//! all race for it, exactly one wins, and the loser finds the map entry
//! gone. JSON serialization and the observer's callback always run on the
//! observer-supplied worker pool, never under the lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use thiserror::Error;

use tempo_core::{Duration, TaskHandle, WorkerPool};

use crate::event::{CycleStamp, EventLog, TraceConfig, TraceEvent};

/// How a trace can end without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The observer's deadline passed before its config said "finished".
    #[error("trace deadline exceeded")]
    DeadlineExceeded,
    /// The collector was torn down with the trace still live.
    #[error("trace collector shut down")]
    Shutdown,
}

type DoneCallback = Box<dyn FnOnce(Result<Value, TraceError>) + Send + 'static>;

struct Instance<C, E: TraceEvent> {
    config: C,
    log: EventLog<E>,
    pool: Arc<dyn WorkerPool>,
    done: DoneCallback,
    deadline_task: TaskHandle,
}

impl<C, E: TraceEvent> Instance<C, E> {
    /// Dispatch the completion on the observer's pool. For the OK path the
    /// JSON rendering happens there too, off the collector lock.
    fn finish(self, result: Result<(), TraceError>) {
        let pool = self.pool.clone();
        pool.cancel(self.deadline_task);
        let done = self.done;
        match result {
            Ok(()) => {
                let log = self.log;
                pool.run(Box::new(move || done(Ok(log.render()))));
            }
            Err(error) => {
                pool.run(Box::new(move || done(Err(error))));
            }
        }
    }
}

struct CollectorImpl<C, E: TraceEvent> {
    /// Fast-path gate for `append`; tracks `instances.len()`.
    live: AtomicUsize,
    state: Mutex<LiveSet<C, E>>,
}

struct LiveSet<C, E: TraceEvent> {
    next_id: u64,
    instances: HashMap<u64, Instance<C, E>>,
}

impl<C, E: TraceEvent> CollectorImpl<C, E> {
    fn remove(&self, id: u64) -> Option<Instance<C, E>> {
        let mut set = self.state.lock().unwrap();
        let instance = set.instances.remove(&id);
        if instance.is_some() {
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
        instance
    }
}

/// Concurrent diagnostic collector for one event type family.
///
/// Cheap to embed: a single lazily-filled pointer. Writers call
/// [`append`](Self::append); observers obtain a [`ZTrace`] handle and
/// [`run`](ZTrace::run) it.
pub struct ZTraceCollector<C: TraceConfig<E>, E: TraceEvent> {
    inner: OnceLock<Arc<CollectorImpl<C, E>>>,
}

impl<C: TraceConfig<E>, E: TraceEvent> Default for ZTraceCollector<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: TraceConfig<E>, E: TraceEvent> ZTraceCollector<C, E> {
    pub fn new() -> Self {
        ZTraceCollector {
            inner: OnceLock::new(),
        }
    }

    /// Record an event on every live trace.
    ///
    /// `producer` is invoked only when at least one observer is live, so
    /// callers may capture expensive state in it freely. The timestamp is
    /// sampled under the lock: appends land in every observer's buffer in
    /// one consistent global order.
    pub fn append<F: FnOnce() -> E>(&self, producer: F) {
        let Some(inner) = self.inner.get() else {
            return;
        };
        if inner.live.load(Ordering::Relaxed) == 0 {
            return;
        }
        let event = producer();

        let mut finished = Vec::new();
        {
            let mut set = inner.state.lock().unwrap();
            let stamp = CycleStamp::now();
            let mut done_ids = Vec::new();
            for (id, instance) in set.instances.iter_mut() {
                let Instance { config, log, .. } = instance;
                log.push(stamp, event.clone());
                if config.finishes(log) {
                    done_ids.push(*id);
                }
            }
            for id in done_ids {
                if let Some(instance) = set.instances.remove(&id) {
                    inner.live.fetch_sub(1, Ordering::Relaxed);
                    finished.push(instance);
                }
            }
        }
        for instance in finished {
            instance.finish(Ok(()));
        }
    }

    /// Open a trace handle, creating and pinning the impl.
    pub fn make_ztrace(&self) -> ZTrace<C, E> {
        let inner = self
            .inner
            .get_or_init(|| {
                Arc::new(CollectorImpl {
                    live: AtomicUsize::new(0),
                    state: Mutex::new(LiveSet {
                        next_id: 1,
                        instances: HashMap::new(),
                    }),
                })
            })
            .clone();
        ZTrace { inner }
    }
}

impl<C: TraceConfig<E>, E: TraceEvent> Drop for ZTraceCollector<C, E> {
    /// Teardown completes every live trace with [`TraceError::Shutdown`].
    /// Outstanding [`ZTrace`] handles stay valid; traces they start after
    /// this point can only end by deadline.
    fn drop(&mut self) {
        let Some(inner) = self.inner.get() else {
            return;
        };
        let drained: Vec<Instance<C, E>> = {
            let mut set = inner.state.lock().unwrap();
            inner.live.store(0, Ordering::Relaxed);
            set.instances.drain().map(|(_, instance)| instance).collect()
        };
        if !drained.is_empty() {
            log::debug!("completing {} live traces at collector teardown", drained.len());
        }
        for instance in drained {
            instance.finish(Err(TraceError::Shutdown));
        }
    }
}

/// Observer-side handle to a collector. Holding it keeps the impl alive.
pub struct ZTrace<C: TraceConfig<E>, E: TraceEvent> {
    inner: Arc<CollectorImpl<C, E>>,
}

impl<C: TraceConfig<E>, E: TraceEvent> ZTrace<C, E> {
    /// Start one bounded trace.
    ///
    /// The trace completes with data when the config's finish predicate
    /// triggers, or with [`TraceError::DeadlineExceeded`] once `deadline`
    /// elapses - whichever removes it from the live set first. `done` runs
    /// on `pool` exactly once either way.
    pub fn run<F>(
        &self,
        deadline: Duration,
        args: BTreeMap<String, String>,
        pool: Arc<dyn WorkerPool>,
        done: F,
    ) where
        F: FnOnce(Result<Value, TraceError>) + Send + 'static,
    {
        let mut set = self.inner.state.lock().unwrap();
        let id = set.next_id;
        set.next_id += 1;

        let impl_for_deadline = self.inner.clone();
        let deadline_task = pool.run_after(
            deadline,
            Box::new(move || {
                if let Some(instance) = impl_for_deadline.remove(id) {
                    instance.finish(Err(TraceError::DeadlineExceeded));
                }
            }),
        );

        set.instances.insert(
            id,
            Instance {
                config: C::from_args(&args),
                log: EventLog::new(),
                pool,
                done: Box::new(done),
                deadline_task,
            },
        );
        self.inner.live.fetch_add(1, Ordering::Relaxed);
    }
}

impl<C: TraceConfig<E>, E: TraceEvent> Clone for ZTrace<C, E> {
    fn clone(&self) -> Self {
        ZTrace {
            inner: self.inner.clone(),
        }
    }
}
