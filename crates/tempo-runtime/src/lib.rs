//! # tempo-runtime
//!
//! Timer machinery for the tempo scheduling fabric.
//!
//! This crate provides:
//! - A sharded, heap-plus-overflow deadline list for precise timers
//! - A slacked, tick-bucketed list for timers that tolerate coarse rounding
//! - A timer train: a periodic driver that dispatches expired closures
//! - A default worker pool and monotonic host implementation

pub mod pool;
pub mod stats;
pub mod timer;

// Re-exports
pub use pool::{ThreadPool, ThreadPoolConfig};
pub use timer::{
    now_ms, SlackedOptions, SlackedTimerList, SystemHost, Timer, TimerList, TrainOptions,
};
pub use timer::{ShardedTimerList, TimerTrain};
