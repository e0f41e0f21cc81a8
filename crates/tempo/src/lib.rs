//! # tempo
//!
//! The time- and flow-scheduling core of an RPC transport, as one facade:
//!
//! - **Timers**: a sharded, precise deadline list for RPC deadlines and
//!   retries; a slacked, bucketed list for coarse housekeeping; and a
//!   timer train that drives the latter periodically.
//! - **Write scheduling**: per-quantum distribution of outgoing bytes
//!   across data channels (`spanrr` and `rand` variants).
//! - **Diagnostics**: the z-trace collector - typed events in, bounded
//!   JSON snapshots out.
//!
//! The host supplies a monotonic clock ([`TimerHost`]) and a callback pool
//! ([`WorkerPool`]); [`SystemHost`] and [`ThreadPool`] are ready-made
//! implementations.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tempo::{Duration, ShardedTimerList, SystemHost, TimerHost, TimerList};
//!
//! let host: Arc<dyn TimerHost> = Arc::new(SystemHost);
//! let timers = ShardedTimerList::new(host.clone());
//!
//! let timer = timers.init(host.now() + Duration::from_millis(30), Box::new(|| {
//!     println!("deadline passed");
//! }));
//! // ... the transport's driver loop calls timers.check(...) ...
//! if timers.cancel(&timer) {
//!     println!("cancelled before it fired");
//! }
//! ```

// Core types and host traits
pub use tempo_core::{parse_timeout, Timeout};
pub use tempo_core::{Duration, TaskCallback, TaskHandle, TimerHost, Timestamp, WorkerPool};

// Timer machinery
pub use tempo_runtime::{now_ms, SystemHost, ThreadPool, ThreadPoolConfig};
pub use tempo_runtime::{
    ShardedTimerList, SlackedOptions, SlackedTimerList, Timer, TimerList, TimerTrain, TrainOptions,
};

// Diagnostics
pub use tempo_trace::{
    CycleStamp, EventLog, TraceConfig, TraceError, TraceEvent, ZTrace, ZTraceCollector,
};

// Write scheduling
pub use tempo_flow::{
    make_scheduler, make_scheduler_seeded, FlowTrace, FlowTraceConfig, FlowZTraceCollector,
    ScheduledChannel, Scheduler,
};
