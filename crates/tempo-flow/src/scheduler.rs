//! Scheduler trait and configuration wire form
//!
//! Config strings look like `spanrr:end_of_burst=random_ready:step=0.5`.
//! An unknown scheduler name falls back to `spanrr`; unknown keys or
//! values are logged and ignored, never fatal - a bad tuning knob must not
//! take down a transport.

use log::error;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::random::RandomChoiceScheduler;
use crate::span::SpanRoundRobinScheduler;
use crate::trace::FlowZTraceCollector;

/// Interface for distributing outgoing bytes across data channels.
///
/// Used in two phases per quantum: collect (`new_step`, then `add_channel`
/// per channel), a plan transition (`make_plan`), then repeated
/// `allocate_message` calls against the plan. Phase order is a hard
/// contract; implementations abort on violations. Quanta are serialized by
/// the caller - a scheduler is not thread-safe across quanta.
pub trait Scheduler: Send {
    /// Apply one `key=value` configuration option.
    fn set_config(&mut self, name: &str, value: &str);

    /// Phase 1: begin a quantum with the bytes awaiting distribution and
    /// the minimum token floor.
    fn new_step(&mut self, outstanding_bytes: f64, min_tokens: f64);

    /// Phase 1: declare one channel. Channels are re-added every quantum.
    ///
    /// `start_time` is how many seconds a byte sent now would take to be
    /// received (kernel queue plus rtt); `bytes_per_second` the channel's
    /// observed delivery rate.
    fn add_channel(&mut self, id: u32, ready: bool, start_time: f64, bytes_per_second: f64);

    /// Transition: materialize the quantum's plan.
    fn make_plan(&mut self, ztrace: &FlowZTraceCollector);

    /// Phase 2: place `bytes` on some ready channel.
    ///
    /// Returns the chosen channel's id, or `None` when every candidate is
    /// non-ready or out of credit - meaning the caller should hold the
    /// message rather than schedule it now.
    fn allocate_message(&mut self, bytes: u64) -> Option<u32>;

    /// The canonical config string this scheduler would be rebuilt from.
    fn config(&self) -> String;
}

/// Fluent helper for one `key=value` option.
///
/// Each `var_*` call consumes the option if the key matches and the value
/// parses; `check` logs anything left unconsumed.
pub(crate) struct ConfigParser<'a> {
    name: &'a str,
    value: &'a str,
    parsed: bool,
}

impl<'a> ConfigParser<'a> {
    pub(crate) fn new(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            value,
            parsed: false,
        }
    }

    pub(crate) fn var_f64(mut self, name: &str, out: &mut f64) -> Self {
        if self.parsed || name != self.name {
            return self;
        }
        if let Ok(value) = self.value.parse::<f64>() {
            *out = value;
            self.parsed = true;
        }
        self
    }

    pub(crate) fn var_enum<T: Copy>(mut self, name: &str, out: &mut T, values: &[(&str, T)]) -> Self {
        if self.parsed || name != self.name {
            return self;
        }
        for (enum_name, enum_value) in values {
            if *enum_name == self.value {
                *out = *enum_value;
                self.parsed = true;
                return self;
            }
        }
        self
    }

    pub(crate) fn parsed(&self) -> bool {
        self.parsed
    }

    pub(crate) fn check(self) {
        if !self.parsed {
            error!(
                "failed to parse scheduler option {}={}",
                self.name, self.value
            );
        }
    }
}

/// Build a scheduler from its config wire form, seeding randomness from
/// the OS.
pub fn make_scheduler(config: &str) -> Box<dyn Scheduler> {
    build(config, StdRng::from_entropy())
}

/// Build a scheduler with a fixed seed, for deterministic tests.
pub fn make_scheduler_seeded(config: &str, seed: u64) -> Box<dyn Scheduler> {
    build(config, StdRng::seed_from_u64(seed))
}

fn build(config: &str, rng: StdRng) -> Box<dyn Scheduler> {
    let mut segments = config.split(':');
    let name = segments.next().unwrap_or("<<empty>>");
    let mut scheduler: Box<dyn Scheduler> = match name {
        "spanrr" => Box::new(SpanRoundRobinScheduler::new(rng)),
        "rand" => Box::new(RandomChoiceScheduler::new(rng)),
        other => {
            error!("unknown scheduler type: {other}, using spanrr scheduler");
            Box::new(SpanRoundRobinScheduler::new(rng))
        }
    };
    for segment in segments {
        let key_value: Vec<&str> = segment.split('=').collect();
        match key_value.as_slice() {
            [key, value] => scheduler.set_config(key, value),
            _ => error!("ignoring invalid scheduler config: {segment}"),
        }
    }
    scheduler
}
