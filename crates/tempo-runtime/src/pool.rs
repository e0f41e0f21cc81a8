//! Default worker pool
//!
//! A small fixed pool of worker threads draining a lock-free injector
//! queue, plus one delay thread that holds a deadline heap and feeds due
//! callbacks back into the queue. Implements the [`WorkerPool`] contract
//! the timer train and trace collector rely on.
//!
//! # Design
//!
//! ```text
//!   run(cb) ──► SegQueue ──► worker threads (park on condvar when idle)
//!                  ▲
//!   run_after ──► delay thread (BinaryHeap by due time, smart sleep)
//! ```
//!
//! Shutdown drains the queue but drops delayed callbacks that never came
//! due.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;

use tempo_core::{Duration, TaskCallback, TaskHandle, WorkerPool};

use crate::timer::now_ms;

/// Configuration for [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Default: number of cores.
    pub num_workers: usize,

    /// Thread name prefix.
    pub thread_name: String,

    /// Upper bound on the delay thread's sleep even with nothing due.
    pub max_poll_interval: Duration,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get().max(1),
            thread_name: "tempo-worker".into(),
            max_poll_interval: Duration::from_millis(100),
        }
    }
}

struct DelayQueue {
    /// (due ms, task id), soonest first.
    heap: BinaryHeap<Reverse<(i64, u64)>>,
    tasks: HashMap<u64, TaskCallback>,
}

struct PoolInner {
    queue: SegQueue<TaskCallback>,
    /// Count of queued-but-unclaimed callbacks; the condvar's predicate.
    permits: Mutex<usize>,
    available: Condvar,
    delay: Mutex<DelayQueue>,
    delay_wake: Condvar,
    next_task_id: AtomicU64,
    shutdown: AtomicBool,
}

impl PoolInner {
    fn enqueue(&self, callback: TaskCallback) {
        self.queue.push(callback);
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }
}

/// Thread-backed [`WorkerPool`].
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
    delay_thread: Option<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self::with_config(ThreadPoolConfig::default())
    }

    pub fn with_config(config: ThreadPoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            permits: Mutex::new(0),
            available: Condvar::new(),
            delay: Mutex::new(DelayQueue {
                heap: BinaryHeap::new(),
                tasks: HashMap::new(),
            }),
            delay_wake: Condvar::new(),
            next_task_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..config.num_workers.max(1))
            .map(|i| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{}", config.thread_name, i))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        let delay_thread = {
            let inner = inner.clone();
            let max_poll = config.max_poll_interval;
            std::thread::Builder::new()
                .name(format!("{}-delay", config.thread_name))
                .spawn(move || delay_loop(&inner, max_poll))
                .expect("failed to spawn delay thread")
        };

        ThreadPool {
            inner,
            workers,
            delay_thread: Some(delay_thread),
        }
    }

    /// Stop all threads. Workers drain callbacks already queued; delayed
    /// callbacks that never came due are dropped without running.
    pub fn shutdown(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = self.inner.delay.lock().unwrap().tasks.len();
        if dropped > 0 {
            log::debug!("worker pool shutdown dropping {dropped} delayed tasks");
        }
        self.inner.available.notify_all();
        self.inner.delay_wake.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.delay_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl WorkerPool for ThreadPool {
    fn run(&self, callback: TaskCallback) {
        self.inner.enqueue(callback);
    }

    fn run_after(&self, delay: Duration, callback: TaskCallback) -> TaskHandle {
        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let due = now_ms().saturating_add(delay.as_millis());
        {
            let mut dq = self.inner.delay.lock().unwrap();
            dq.heap.push(Reverse((due, id)));
            dq.tasks.insert(id, callback);
        }
        self.inner.delay_wake.notify_one();
        TaskHandle { keys: [id, due as u64] }
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        // The heap entry stays behind; the delay loop skips ids with no
        // callback.
        let mut dq = self.inner.delay.lock().unwrap();
        dq.tasks.remove(&handle.keys[0]).is_some()
    }
}

fn worker_loop(inner: &Arc<PoolInner>) {
    loop {
        let mut permits = inner.permits.lock().unwrap();
        while *permits == 0 {
            if inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
            permits = inner.available.wait(permits).unwrap();
        }
        *permits -= 1;
        drop(permits);
        // A permit guarantees a queued callback: push precedes increment.
        if let Some(callback) = inner.queue.pop() {
            callback();
        }
    }
}

fn delay_loop(inner: &Arc<PoolInner>, max_poll: Duration) {
    let mut dq = inner.delay.lock().unwrap();
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = now_ms();
        // Dispatch everything due; skip entries cancelled out of the map.
        let mut due_callbacks = Vec::new();
        while let Some(&Reverse((due, id))) = dq.heap.peek() {
            if due > now {
                break;
            }
            dq.heap.pop();
            if let Some(callback) = dq.tasks.remove(&id) {
                due_callbacks.push(callback);
            }
        }
        if !due_callbacks.is_empty() {
            drop(dq);
            for callback in due_callbacks {
                inner.enqueue(callback);
            }
            dq = inner.delay.lock().unwrap();
            continue;
        }
        // Smart sleep: until the next deadline, bounded by the poll cap.
        let sleep_ms = match dq.heap.peek() {
            Some(&Reverse((due, _))) => (due - now).clamp(1, max_poll.as_millis()),
            None => max_poll.as_millis(),
        };
        let (guard, _) = inner
            .delay_wake
            .wait_timeout(dq, std::time::Duration::from_millis(sleep_ms as u64))
            .unwrap();
        dq = guard;
    }
}
