//! Flow trace events
//!
//! The concrete z-trace vocabulary of the write path. The scheduler
//! appends a `WriteSchedule` after each plan; the transport's write loops
//! append the rest around actual socket work.

use std::collections::BTreeMap;
use std::mem::size_of;

use serde_json::{Map, Value};

use tempo_trace::{EventLog, TraceConfig, TraceEvent, ZTraceCollector};

/// One channel's slice of a plan, as captured for tracing.
#[derive(Debug, Clone)]
pub struct ScheduledChannel {
    pub id: u32,
    pub ready: bool,
    pub start_time: f64,
    pub bytes_per_second: f64,
    pub allowed_bytes: f64,
}

#[derive(Debug, Clone)]
pub enum FlowTrace {
    /// A completed plan: every channel's credit plus the quantum inputs.
    WriteSchedule {
        channels: Vec<ScheduledChannel>,
        outstanding_bytes: f64,
        end_time_requested: f64,
        end_time_adjusted: f64,
        min_tokens: f64,
        num_ready: usize,
    },
    /// Bytes handed to a channel's endpoint.
    WriteBytes { channel_id: u32, bytes: u64 },
    /// A channel's write completed.
    FinishWrite { channel_id: u32, ok: bool },
    /// Allocation declined: no channel could take the message now.
    NoChannelForWrite { bytes: u64 },
    /// A channel left the channel set.
    ChannelClose { channel_id: u32 },
}

impl TraceEvent for FlowTrace {
    const KIND_COUNT: usize = 5;

    fn kind(&self) -> usize {
        match self {
            FlowTrace::WriteSchedule { .. } => 0,
            FlowTrace::WriteBytes { .. } => 1,
            FlowTrace::FinishWrite { .. } => 2,
            FlowTrace::NoChannelForWrite { .. } => 3,
            FlowTrace::ChannelClose { .. } => 4,
        }
    }

    fn memory_usage(&self) -> usize {
        match self {
            FlowTrace::WriteSchedule { channels, .. } => {
                size_of::<Self>() + channels.len() * size_of::<ScheduledChannel>()
            }
            _ => size_of::<Self>(),
        }
    }

    fn render(&self, object: &mut Map<String, Value>) {
        match self {
            FlowTrace::WriteSchedule {
                channels,
                outstanding_bytes,
                end_time_requested,
                end_time_adjusted,
                min_tokens,
                num_ready,
            } => {
                object.insert("metadata_type".into(), Value::from("WRITE_SCHEDULE"));
                object.insert("outstanding_bytes".into(), Value::from(*outstanding_bytes));
                object.insert("end_time_requested".into(), Value::from(*end_time_requested));
                object.insert("end_time_adjusted".into(), Value::from(*end_time_adjusted));
                object.insert("min_tokens".into(), Value::from(*min_tokens));
                object.insert("num_ready".into(), Value::from(*num_ready));
                let entries: Vec<Value> = channels
                    .iter()
                    .map(|c| {
                        let mut entry = Map::new();
                        entry.insert("id".into(), Value::from(c.id));
                        entry.insert("ready".into(), Value::from(c.ready));
                        entry.insert("start_time".into(), Value::from(c.start_time));
                        entry.insert("rate".into(), Value::from(c.bytes_per_second));
                        entry.insert("allowed_bytes".into(), Value::from(c.allowed_bytes));
                        Value::Object(entry)
                    })
                    .collect();
                object.insert("channels".into(), Value::Array(entries));
            }
            FlowTrace::WriteBytes { channel_id, bytes } => {
                object.insert("metadata_type".into(), Value::from("WRITE_BYTES"));
                object.insert("channel_id".into(), Value::from(*channel_id));
                object.insert("bytes".into(), Value::from(*bytes));
            }
            FlowTrace::FinishWrite { channel_id, ok } => {
                object.insert("metadata_type".into(), Value::from("FINISH_WRITE"));
                object.insert("channel_id".into(), Value::from(*channel_id));
                object.insert("ok".into(), Value::from(*ok));
            }
            FlowTrace::NoChannelForWrite { bytes } => {
                object.insert("metadata_type".into(), Value::from("NO_CHANNEL_FOR_WRITE"));
                object.insert("bytes".into(), Value::from(*bytes));
            }
            FlowTrace::ChannelClose { channel_id } => {
                object.insert("metadata_type".into(), Value::from("CHANNEL_CLOSE"));
                object.insert("channel_id".into(), Value::from(*channel_id));
            }
        }
    }
}

/// Observer configuration for flow traces.
///
/// By default a trace runs until its deadline; an observer may pass
/// `limit=<n>` in its argument map to complete with data as soon as `n`
/// events have been captured.
pub struct FlowTraceConfig {
    limit: Option<usize>,
}

impl TraceConfig<FlowTrace> for FlowTraceConfig {
    fn from_args(args: &BTreeMap<String, String>) -> Self {
        FlowTraceConfig {
            limit: args.get("limit").and_then(|v| v.parse().ok()),
        }
    }

    fn finishes(&self, log: &EventLog<FlowTrace>) -> bool {
        self.limit.is_some_and(|limit| log.len() >= limit)
    }
}

/// The collector type every write-path component appends into.
pub type FlowZTraceCollector = ZTraceCollector<FlowTraceConfig, FlowTrace>;
