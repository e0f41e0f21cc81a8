//! Random-choice scheduler
//!
//! The planless variant: every allocation rolls weighted dice over the
//! channel set. Useful as a baseline against `spanrr` and for transports
//! where per-quantum planning is not worth the arithmetic.

use rand::rngs::StdRng;
use rand::Rng;

use crate::scheduler::{ConfigParser, Scheduler};
use crate::trace::FlowZTraceCollector;

/// Pick an index from `channels`, weighted by `weight_fn`.
///
/// Walks the list twice: once to sum the positive weights, once to locate
/// the pick under the dice roll. Channels with non-positive (or
/// non-finite) weight are never chosen; a non-positive total yields
/// `None`. `weight_fn` must be deterministic across the two passes.
pub(crate) fn choose_weighted<C>(
    channels: &[C],
    bytes: u64,
    rng: &mut StdRng,
    weight_fn: impl Fn(&C, u64) -> f64,
) -> Option<usize> {
    if channels.is_empty() {
        return None;
    }
    let mut total_weight = 0.0;
    for channel in channels {
        let weight = weight_fn(channel, bytes);
        if weight > 0.0 && weight.is_finite() {
            total_weight += weight;
        }
    }
    if total_weight <= 0.0 || !total_weight.is_finite() {
        return None;
    }
    let mut dice_roll = rng.gen_range(0.0..total_weight);
    for (i, channel) in channels.iter().enumerate() {
        let weight = weight_fn(channel, bytes);
        if weight <= 0.0 || !weight.is_finite() {
            continue;
        }
        if weight >= dice_roll {
            return Some(i);
        }
        dice_roll -= weight;
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeightFn {
    AnyReady,
    InverseReceiveTime,
    ReadyInverseReceiveTime,
}

impl WeightFn {
    fn as_str(self) -> &'static str {
        match self {
            WeightFn::AnyReady => "any_ready",
            WeightFn::InverseReceiveTime => "inverse_receive_time",
            WeightFn::ReadyInverseReceiveTime => "ready_inverse_receive_time",
        }
    }
}

struct Channel {
    id: u32,
    ready: bool,
    start_time: f64,
    bytes_per_second: f64,
}

fn inverse_receive_time(channel: &Channel, bytes: u64) -> f64 {
    1.0 / (channel.start_time + bytes as f64 / channel.bytes_per_second)
}

/// Weighted-random channel chooser; config name `rand`.
pub(crate) struct RandomChoiceScheduler {
    channels: Vec<Channel>,
    num_ready: usize,
    weight_fn: WeightFn,
    step_s: f64,
    rng: StdRng,
    planned: bool,
}

impl RandomChoiceScheduler {
    pub(crate) fn new(rng: StdRng) -> Self {
        Self {
            channels: Vec::new(),
            num_ready: 0,
            weight_fn: WeightFn::AnyReady,
            step_s: 1.0,
            rng,
            planned: false,
        }
    }
}

impl Scheduler for RandomChoiceScheduler {
    fn set_config(&mut self, name: &str, value: &str) {
        ConfigParser::new(name, value)
            .var_enum(
                "weight",
                &mut self.weight_fn,
                &[
                    ("any_ready", WeightFn::AnyReady),
                    ("inverse_receive_time", WeightFn::InverseReceiveTime),
                    (
                        "ready_inverse_receive_time",
                        WeightFn::ReadyInverseReceiveTime,
                    ),
                ],
            )
            .var_f64("step", &mut self.step_s)
            .check();
    }

    fn new_step(&mut self, _outstanding_bytes: f64, _min_tokens: f64) {
        self.channels.clear();
        self.planned = false;
    }

    fn add_channel(&mut self, id: u32, ready: bool, start_time: f64, bytes_per_second: f64) {
        assert!(!self.planned, "add_channel after make_plan");
        self.channels.push(Channel {
            id,
            ready,
            start_time,
            bytes_per_second,
        });
    }

    fn make_plan(&mut self, _ztrace: &FlowZTraceCollector) {
        assert!(!self.planned, "make_plan called twice in one quantum");
        // Stable partition: ready channels first.
        self.channels.sort_by_key(|c| !c.ready);
        self.num_ready = self.channels.iter().take_while(|c| c.ready).count();
        self.planned = true;
    }

    fn allocate_message(&mut self, bytes: u64) -> Option<u32> {
        assert!(self.planned, "allocate_message before make_plan");
        let chosen = match self.weight_fn {
            WeightFn::AnyReady => choose_weighted(
                &self.channels[..self.num_ready],
                bytes,
                &mut self.rng,
                |_, _| 1.0,
            ),
            WeightFn::InverseReceiveTime => {
                choose_weighted(&self.channels, bytes, &mut self.rng, inverse_receive_time)
            }
            WeightFn::ReadyInverseReceiveTime => choose_weighted(
                &self.channels[..self.num_ready],
                bytes,
                &mut self.rng,
                inverse_receive_time,
            ),
        }?;
        let channel = &self.channels[chosen];
        if !channel.ready {
            return None;
        }
        Some(channel.id)
    }

    fn config(&self) -> String {
        format!("rand:weight={}:step={}", self.weight_fn.as_str(), self.step_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::make_scheduler_seeded;

    fn collector() -> FlowZTraceCollector {
        FlowZTraceCollector::new()
    }

    #[test]
    fn test_any_ready_picks_only_ready_channels() {
        let ztrace = collector();
        let mut s = make_scheduler_seeded("rand", 7);
        for round in 0..20 {
            s.new_step(1000.0, 0.0);
            s.add_channel(1, true, 0.0, 500.0);
            s.add_channel(2, false, 0.0, 500.0);
            s.add_channel(3, true, 0.1, 200.0);
            s.make_plan(&ztrace);
            let id = s.allocate_message(100).unwrap();
            assert!(id == 1 || id == 3, "round {round} picked {id}");
        }
    }

    #[test]
    fn test_zero_ready_channels_always_declines() {
        let ztrace = collector();
        let mut s = make_scheduler_seeded("rand", 1);
        s.new_step(1000.0, 0.0);
        s.add_channel(1, false, 0.0, 500.0);
        s.add_channel(2, false, 0.0, 500.0);
        s.make_plan(&ztrace);
        for _ in 0..10 {
            assert_eq!(s.allocate_message(10), None);
        }
    }

    #[test]
    fn test_inverse_receive_time_may_pick_busy_channel() {
        let ztrace = collector();
        let mut s = make_scheduler_seeded("rand:weight=inverse_receive_time", 3);
        s.new_step(1000.0, 0.0);
        // Only non-ready channels: every roll lands on one, and allocation
        // declines.
        s.add_channel(1, false, 0.1, 500.0);
        s.add_channel(2, false, 0.2, 500.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(100), None);
    }

    #[test]
    fn test_zero_total_weight_returns_none() {
        let ztrace = collector();
        let mut s = make_scheduler_seeded("rand:weight=ready_inverse_receive_time", 5);
        s.new_step(1000.0, 0.0);
        // Zero rate makes the receive time infinite and the weight zero.
        s.add_channel(1, true, 0.0, 0.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(100), None);
    }

    #[test]
    fn test_no_channels_at_all() {
        let ztrace = collector();
        let mut s = make_scheduler_seeded("rand", 5);
        s.new_step(0.0, 0.0);
        s.make_plan(&ztrace);
        assert_eq!(s.allocate_message(1), None);
    }

    #[test]
    fn test_choose_weighted_respects_weights() {
        let mut rng = <StdRng as rand::SeedableRng>::seed_from_u64(42);
        let weights = [0.0, 5.0, 0.0, 1.0];
        let mut hits = [0usize; 4];
        for _ in 0..600 {
            let i = choose_weighted(&weights, 0, &mut rng, |w, _| *w).unwrap();
            hits[i] += 1;
        }
        assert_eq!(hits[0], 0);
        assert_eq!(hits[2], 0);
        assert!(hits[1] > hits[3] * 2, "hits: {hits:?}");
    }
}
