//! # tempo-flow
//!
//! The multi-endpoint write scheduler: each quantum, map an outstanding
//! byte count onto N data channels according to their observed rates and
//! staggered readiness.
//!
//! A quantum walks three phases in strict order:
//!
//! ```text
//!   new_step ──► add_channel* ──► make_plan ──► allocate_message*
//!   (Collect)                    (Plan)         (Allocate)
//! ```
//!
//! Two scheduler variants share the surface: `spanrr` plans per-channel
//! byte credits so every channel finishes near a common end time, then
//! round-robins allocations across the ready set; `rand` skips planning
//! and picks weighted-random channels. Both are chosen and tuned through a
//! `name:key=value` config string.

mod random;
mod scheduler;
mod span;
mod trace;

pub use scheduler::{make_scheduler, make_scheduler_seeded, Scheduler};
pub use trace::{FlowTrace, FlowTraceConfig, FlowZTraceCollector, ScheduledChannel};
