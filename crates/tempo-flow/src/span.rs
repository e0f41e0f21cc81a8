//! Span round-robin scheduler
//!
//! The planning variant. Given when each channel can deliver its next
//! queued byte and how fast it drains, the plan asks: how many bytes of
//! the outstanding work should each channel carry so that everyone
//! finishes near the same target end time? Channels are admitted to the
//! collective in start-time order; within each window between admissions,
//! deliverable bytes split pro-rata by rate.
//!
//! With lots of work available placement barely matters and the plan says
//! so (everyone gets credit); as the burst drains, allocation focuses on
//! the channels that still have room before the common end time.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::random::choose_weighted;
use crate::scheduler::{ConfigParser, Scheduler};
use crate::trace::{FlowTrace, FlowZTraceCollector, ScheduledChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collect,
    Planned,
}

#[derive(Debug, Clone)]
struct Channel {
    id: u32,
    ready: bool,
    start_time: f64,
    bytes_per_second: f64,
    allowed_bytes: f64,
}

/// Quantum state and plan construction shared by span schedulers.
struct SpanCore {
    initial_outstanding_bytes: f64,
    end_time_requested: f64,
    min_tokens: f64,
    end_time: f64,
    outstanding_bytes: f64,
    num_ready: usize,
    channels: Vec<Channel>,
    phase: Phase,
}

impl SpanCore {
    fn new() -> Self {
        Self {
            initial_outstanding_bytes: 0.0,
            end_time_requested: 1.0,
            min_tokens: 0.0,
            end_time: 0.0,
            outstanding_bytes: 0.0,
            num_ready: 0,
            channels: Vec::new(),
            phase: Phase::Collect,
        }
    }

    fn new_step(&mut self, outstanding_bytes: f64, min_tokens: f64) {
        self.initial_outstanding_bytes = outstanding_bytes;
        self.outstanding_bytes = outstanding_bytes;
        self.min_tokens = min_tokens;
        self.channels.clear();
        self.phase = Phase::Collect;
    }

    fn add_channel(&mut self, id: u32, ready: bool, start_time: f64, bytes_per_second: f64) {
        assert!(
            self.phase == Phase::Collect,
            "add_channel after make_plan in the same quantum"
        );
        self.channels.push(Channel {
            id,
            ready,
            start_time,
            bytes_per_second,
            allowed_bytes: 0.0,
        });
    }

    /// A channel that never accumulates `min_tokens` by the requested end
    /// time would be starved of its token floor; push the end time out to
    /// the earliest point where the fastest-starting channel gets there.
    fn adjust_end_time_for_min_tokens(&mut self) {
        let mut earliest_end_time = f64::MAX;
        for channel in &self.channels {
            let end_time = channel.start_time + self.min_tokens / channel.bytes_per_second;
            if end_time < earliest_end_time {
                earliest_end_time = end_time;
            }
        }
        self.end_time = self.end_time_requested.max(earliest_end_time);
    }

    /// Treat channels `0..=max_channel_idx` (sorted by start time) as one
    /// collective over the window from this channel's start to the next
    /// channel's start (or the plan end). The window's deliverable bytes,
    /// `sum(rates) * dt`, come off the outstanding count and split
    /// pro-rata by rate. Returns false once nothing is left to distribute
    /// or the window never opens.
    fn distribute_bytes_to_collective(&mut self, max_channel_idx: usize) -> bool {
        if self.outstanding_bytes < 1.0 {
            return false;
        }
        debug_assert!(max_channel_idx < self.channels.len());
        let start_time = self.channels[max_channel_idx].start_time;
        if start_time > self.end_time {
            return false;
        }
        let end_time = if max_channel_idx == self.channels.len() - 1 {
            self.end_time
        } else {
            self.end_time
                .min(self.channels[max_channel_idx + 1].start_time)
        };
        let total_delivery_rate: f64 = self.channels[..=max_channel_idx]
            .iter()
            .map(|c| c.bytes_per_second)
            .sum();
        let bytes_deliverable = total_delivery_rate * (end_time - start_time);
        let bytes_to_deliver = if bytes_deliverable >= self.outstanding_bytes {
            std::mem::replace(&mut self.outstanding_bytes, 0.0)
        } else {
            self.outstanding_bytes -= bytes_deliverable;
            bytes_deliverable
        };
        for channel in &mut self.channels[..=max_channel_idx] {
            channel.allowed_bytes +=
                bytes_to_deliver * channel.bytes_per_second / total_delivery_rate;
        }
        true
    }

    fn make_plan(&mut self, rng: &mut StdRng, ztrace: &FlowZTraceCollector) {
        assert!(
            self.phase == Phase::Collect,
            "make_plan called twice in one quantum"
        );
        // Account for the min-token floor, then admit channels to the
        // collective in start-time order.
        self.adjust_end_time_for_min_tokens();
        self.channels.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for i in 0..self.channels.len() {
            if !self.distribute_bytes_to_collective(i) {
                break;
            }
        }
        // Ready channels first (stable), then de-bias round-robin across
        // quanta by shuffling the ready prefix.
        self.channels.sort_by_key(|c| !c.ready);
        self.num_ready = self.channels.iter().take_while(|c| c.ready).count();
        if self.num_ready > 1 {
            self.channels[..self.num_ready].shuffle(rng);
        }
        self.phase = Phase::Planned;

        if self.num_ready != 0 {
            ztrace.append(|| {
                let mut channels: Vec<ScheduledChannel> = self
                    .channels
                    .iter()
                    .map(|c| ScheduledChannel {
                        id: c.id,
                        ready: c.ready,
                        start_time: c.start_time,
                        bytes_per_second: c.bytes_per_second,
                        allowed_bytes: c.allowed_bytes,
                    })
                    .collect();
                channels.sort_by_key(|c| c.id);
                FlowTrace::WriteSchedule {
                    channels,
                    outstanding_bytes: self.initial_outstanding_bytes,
                    end_time_requested: self.end_time_requested,
                    end_time_adjusted: self.end_time,
                    min_tokens: self.min_tokens,
                    num_ready: self.num_ready,
                }
            });
        }
    }

    /// Commit `bytes` to the channel at `idx`: spend its credit and push
    /// its next-byte time out accordingly.
    fn take(&mut self, idx: usize, bytes: u64) -> u32 {
        let channel = &mut self.channels[idx];
        debug_assert!(channel.ready);
        channel.allowed_bytes -= bytes as f64;
        channel.start_time += bytes as f64 / channel.bytes_per_second;
        channel.id
    }

    /// Credit still unspent across the whole plan.
    fn remaining_credit(&self) -> f64 {
        self.channels.iter().map(|c| c.allowed_bytes).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndOfBurst {
    RandomDeliveryTime,
    RandomAllowedBytes,
    RandomReady,
    RandomChannel,
}

impl EndOfBurst {
    fn as_str(self) -> &'static str {
        match self {
            EndOfBurst::RandomDeliveryTime => "random_delivery_time",
            EndOfBurst::RandomAllowedBytes => "random_allowed_bytes",
            EndOfBurst::RandomReady => "random_ready",
            EndOfBurst::RandomChannel => "random_channel",
        }
    }
}

/// Span scheduler with round-robin allocation; config name `spanrr`.
pub(crate) struct SpanRoundRobinScheduler {
    core: SpanCore,
    next_ready: usize,
    end_of_burst: EndOfBurst,
    rng: StdRng,
}

impl SpanRoundRobinScheduler {
    pub(crate) fn new(rng: StdRng) -> Self {
        Self {
            core: SpanCore::new(),
            next_ready: 0,
            end_of_burst: EndOfBurst::RandomDeliveryTime,
            rng,
        }
    }

    /// The chooser behind `allocate_message`; returns an index into the
    /// channel array, or `None` when nothing should be scheduled now.
    fn choose_channel(&mut self, bytes: u64) -> Option<usize> {
        let core = &self.core;
        // First search: round-robin through the ready channels for one
        // with credit for the whole message.
        let first_checked = self.next_ready;
        loop {
            let idx = self.next_ready;
            self.next_ready = (self.next_ready + 1) % core.num_ready;
            if core.channels[idx].allowed_bytes >= bytes as f64 {
                return Some(idx);
            }
            if self.next_ready == first_checked {
                break;
            }
        }
        // Second search: a non-ready channel with capacity means the plan
        // wants these bytes elsewhere - do not schedule now.
        for channel in &core.channels[core.num_ready..] {
            if channel.allowed_bytes >= bytes as f64 {
                return None;
            }
        }
        // Bytes were distributed, not messages, and messages don't
        // partition nicely - so near the end of a burst no single channel
        // may have room even though the plan as a whole does. Pick by the
        // configured bias. If even the aggregate credit can't cover the
        // message the plan is simply exhausted: decline the quantum.
        if !(core.remaining_credit() >= bytes as f64) {
            return None;
        }
        let chosen = match self.end_of_burst {
            EndOfBurst::RandomDeliveryTime => {
                choose_weighted(&core.channels, bytes, &mut self.rng, |c, bytes| {
                    let delivery_time = c.start_time + bytes as f64 / c.bytes_per_second;
                    1.0 / delivery_time
                })
            }
            EndOfBurst::RandomAllowedBytes => {
                choose_weighted(&core.channels, bytes, &mut self.rng, |c, _| c.allowed_bytes)
            }
            EndOfBurst::RandomReady => choose_weighted(
                &core.channels[..core.num_ready],
                bytes,
                &mut self.rng,
                |_, _| 1.0,
            ),
            EndOfBurst::RandomChannel => {
                choose_weighted(&core.channels, bytes, &mut self.rng, |_, _| 1.0)
            }
        }?;
        if chosen >= core.num_ready {
            return None;
        }
        Some(chosen)
    }

    #[cfg(test)]
    fn planned_channels(&self) -> Vec<(u32, bool, f64)> {
        self.core
            .channels
            .iter()
            .map(|c| (c.id, c.ready, c.allowed_bytes))
            .collect()
    }

    #[cfg(test)]
    fn num_ready(&self) -> usize {
        self.core.num_ready
    }
}

impl Scheduler for SpanRoundRobinScheduler {
    fn set_config(&mut self, name: &str, value: &str) {
        let parser = ConfigParser::new(name, value).var_enum(
            "end_of_burst",
            &mut self.end_of_burst,
            &[
                ("random_delivery_time", EndOfBurst::RandomDeliveryTime),
                ("random_allowed_bytes", EndOfBurst::RandomAllowedBytes),
                ("random_ready", EndOfBurst::RandomReady),
                ("random_channel", EndOfBurst::RandomChannel),
            ],
        );
        if !parser.parsed() {
            parser
                .var_f64("step", &mut self.core.end_time_requested)
                .check();
        }
    }

    fn new_step(&mut self, outstanding_bytes: f64, min_tokens: f64) {
        self.core.new_step(outstanding_bytes, min_tokens);
        self.next_ready = 0;
    }

    fn add_channel(&mut self, id: u32, ready: bool, start_time: f64, bytes_per_second: f64) {
        self.core.add_channel(id, ready, start_time, bytes_per_second);
    }

    fn make_plan(&mut self, ztrace: &FlowZTraceCollector) {
        self.core.make_plan(&mut self.rng, ztrace);
    }

    fn allocate_message(&mut self, bytes: u64) -> Option<u32> {
        assert!(
            self.core.phase == Phase::Planned,
            "allocate_message before make_plan"
        );
        if self.core.num_ready == 0 {
            return None;
        }
        let idx = self.choose_channel(bytes)?;
        Some(self.core.take(idx, bytes))
    }

    fn config(&self) -> String {
        format!(
            "spanrr:end_of_burst={}:step={}",
            self.end_of_burst.as_str(),
            self.core.end_time_requested
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn collector() -> FlowZTraceCollector {
        FlowZTraceCollector::new()
    }

    fn spanrr(seed: u64) -> SpanRoundRobinScheduler {
        SpanRoundRobinScheduler::new(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_single_quantum_even_split() {
        let ztrace = collector();
        let mut s = spanrr(11);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.add_channel(2, true, 0.0, 500.0);
        s.make_plan(&ztrace);

        for (_, _, allowed) in s.planned_channels() {
            assert!((allowed - 500.0).abs() < 1e-9, "allowed={allowed}");
        }

        let first = s.allocate_message(250).unwrap();
        let second = s.allocate_message(250).unwrap();
        assert_ne!(first, second, "round robin alternates the two channels");
        assert_eq!(s.allocate_message(600), None, "plan credit exhausted");
    }

    #[test]
    fn test_allocation_decrements_credit_and_advances_start() {
        let ztrace = collector();
        let mut s = spanrr(3);
        s.new_step(1000.0, 0.0);
        s.add_channel(7, true, 0.0, 1000.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(400), Some(7));
        let channels = &s.core.channels;
        assert!((channels[0].allowed_bytes - 600.0).abs() < 1e-9);
        assert!((channels[0].start_time - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_plan_never_exceeds_outstanding() {
        let ztrace = collector();
        let mut s = spanrr(5);
        s.new_step(300.0, 0.0);
        s.add_channel(1, true, 0.0, 1000.0);
        s.add_channel(2, true, 0.0, 4000.0);
        s.make_plan(&ztrace);
        let total: f64 = s.planned_channels().iter().map(|(_, _, a)| a).sum();
        assert!(total <= 300.0 + 1e-9, "total={total}");
    }

    #[test]
    fn test_ready_channels_occupy_prefix() {
        let ztrace = collector();
        let mut s = spanrr(9);
        s.new_step(10_000.0, 0.0);
        s.add_channel(1, false, 0.0, 100.0);
        s.add_channel(2, true, 0.0, 100.0);
        s.add_channel(3, false, 0.1, 100.0);
        s.add_channel(4, true, 0.2, 100.0);
        s.make_plan(&ztrace);

        let channels = s.planned_channels();
        let num_ready = s.num_ready();
        assert_eq!(num_ready, 2);
        assert!(channels[..num_ready].iter().all(|(_, ready, _)| *ready));
        assert!(channels[num_ready..].iter().all(|(_, ready, _)| !*ready));
    }

    #[test]
    fn test_staggered_starts_favor_early_channel() {
        let ztrace = collector();
        let mut s = spanrr(13);
        s.new_step(2000.0, 0.0);
        s.add_channel(1, true, 0.0, 1000.0);
        s.add_channel(2, true, 0.5, 1000.0);
        s.make_plan(&ztrace);

        let channels = s.planned_channels();
        let allowed_1 = channels.iter().find(|(id, ..)| *id == 1).unwrap().2;
        let allowed_2 = channels.iter().find(|(id, ..)| *id == 2).unwrap().2;
        // Channel 1 works alone for the first half second (500 bytes),
        // then the window 0.5..1.0 splits evenly.
        assert!((allowed_1 - 1000.0).abs() < 1e-9, "allowed_1={allowed_1}");
        assert!((allowed_2 - 500.0).abs() < 1e-9, "allowed_2={allowed_2}");
    }

    #[test]
    fn test_min_tokens_extends_end_time() {
        let ztrace = collector();
        let mut s = spanrr(17);
        s.new_step(1000.0, 100.0);
        // A byte sent now lands at 0.5s; 100 tokens at 100 B/s takes
        // another full second: the effective end time becomes 1.5s.
        s.add_channel(1, true, 0.5, 100.0);
        s.make_plan(&ztrace);
        assert!((s.core.end_time - 1.5).abs() < 1e-9);
        let total: f64 = s.planned_channels().iter().map(|(_, _, a)| a).sum();
        assert!((total - 100.0).abs() < 1e-9, "total={total}");
    }

    #[test]
    fn test_end_of_burst_bias_splits_fragmented_credit() {
        let ztrace = collector();
        let mut s = spanrr(19);
        s.new_step(500.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.add_channel(2, true, 0.0, 500.0);
        s.make_plan(&ztrace);
        // 250 of credit on each channel; no single channel covers 300,
        // but the plan as a whole does, so the bias picks one anyway.
        let id = s.allocate_message(300);
        assert!(id.is_some());
    }

    #[test]
    fn test_zero_outstanding_yields_zero_credit() {
        let ztrace = collector();
        let mut s = spanrr(23);
        s.new_step(0.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.add_channel(2, true, 0.0, 500.0);
        s.make_plan(&ztrace);
        assert!(s
            .planned_channels()
            .iter()
            .all(|(_, _, allowed)| *allowed == 0.0));
        assert_eq!(s.allocate_message(1), None);
    }

    #[test]
    fn test_zero_ready_channels_never_allocates() {
        let ztrace = collector();
        let mut s = spanrr(29);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, false, 0.0, 500.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(10), None);
    }

    #[test]
    fn test_zero_total_rate_is_legal_and_declines() {
        let ztrace = collector();
        let mut s = spanrr(31);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, true, 0.0, 0.0);
        s.add_channel(2, true, 0.0, 0.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(10), None);
    }

    #[test]
    fn test_non_ready_capacity_blocks_allocation() {
        let ztrace = collector();
        let mut s = spanrr(37);
        s.new_step(1000.0, 0.0);
        // The non-ready channel is faster, so the plan parks most credit
        // on it; a message too big for the ready channel's credit must
        // wait for the non-ready one.
        s.add_channel(1, true, 0.0, 100.0);
        s.add_channel(2, false, 0.0, 900.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(500), None);
    }

    #[test]
    fn test_plan_appends_write_schedule_trace() {
        use std::collections::BTreeMap;
        use std::sync::{Arc, Mutex};
        use tempo_core::{TaskCallback, TaskHandle, WorkerPool};

        struct InlinePool;
        impl WorkerPool for InlinePool {
            fn run(&self, callback: TaskCallback) {
                callback();
            }
            fn run_after(&self, _d: tempo_core::Duration, _cb: TaskCallback) -> TaskHandle {
                TaskHandle::INVALID
            }
            fn cancel(&self, _h: TaskHandle) -> bool {
                false
            }
        }

        let ztrace = collector();
        let handle = ztrace.make_ztrace();
        let results = Arc::new(Mutex::new(Vec::new()));
        {
            let results = results.clone();
            handle.run(
                tempo_core::Duration::from_secs(60),
                BTreeMap::new(),
                Arc::new(InlinePool),
                move |outcome| results.lock().unwrap().push(outcome),
            );
        }

        let mut s = spanrr(41);
        s.new_step(1000.0, 0.0);
        s.add_channel(2, true, 0.0, 500.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.make_plan(&ztrace);

        drop(ztrace); // completes the observer with Shutdown; data was racy
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    #[should_panic(expected = "allocate_message before make_plan")]
    fn test_allocate_before_plan_aborts() {
        let mut s = spanrr(43);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.allocate_message(10);
    }

    #[test]
    #[should_panic(expected = "add_channel after make_plan")]
    fn test_add_channel_after_plan_aborts() {
        let ztrace = collector();
        let mut s = spanrr(47);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.make_plan(&ztrace);
        s.add_channel(2, true, 0.0, 500.0);
    }

    #[test]
    fn test_new_step_resets_the_quantum() {
        let ztrace = collector();
        let mut s = spanrr(53);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, true, 0.0, 500.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(100), Some(1));

        s.new_step(2000.0, 0.0);
        s.add_channel(2, true, 0.0, 500.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(100), Some(2));
    }
}
