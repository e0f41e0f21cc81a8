//! # tempo-core
//!
//! Platform-agnostic types and traits for the tempo scheduling fabric.
//!
//! This crate provides:
//! - Millisecond-precision monotonic time types ([`Timestamp`], [`Duration`])
//! - Host abstraction traits ([`TimerHost`], [`WorkerPool`])
//! - The grpc-timeout wire codec ([`Timeout`], [`parse_timeout`])
//!
//! Everything that actually schedules work lives in `tempo-runtime`,
//! `tempo-trace` and `tempo-flow`; this crate is the shared vocabulary.

pub mod host;
pub mod time;
pub mod timeout;

// Re-exports
pub use host::{TaskCallback, TaskHandle, TimerHost, WorkerPool};
pub use time::{Duration, Timestamp};
pub use timeout::{parse_timeout, Timeout};
