//! # tempo-trace
//!
//! A bounded diagnostic capture fabric ("z-trace") for the tempo stack.
//!
//! Hot paths drop typed events into a [`ZTraceCollector`]; external
//! observers open a trace with a deadline and receive a consolidated JSON
//! snapshot when the trace finishes or the deadline passes. When nobody is
//! observing, an append is two atomic loads - event producers are lazy
//! closures that never run without a live observer.

mod collector;
mod event;

pub use collector::{TraceError, ZTrace, ZTraceCollector};
pub use event::{CycleStamp, EventLog, TraceConfig, TraceEvent};
