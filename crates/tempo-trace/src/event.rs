//! Trace event vocabulary
//!
//! Event types participate in tracing by implementing [`TraceEvent`]:
//! a kind index (declaration order of their variants), a memory-size
//! accessor, and a JSON renderer. A [`TraceConfig`] decides, after each
//! append, whether an observer has seen enough.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// High-resolution timestamp captured when an event is appended.
///
/// Nanoseconds after the process epoch; cheap to take and totally ordered
/// within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleStamp(u64);

impl CycleStamp {
    pub fn now() -> CycleStamp {
        use std::sync::OnceLock;
        use std::time::Instant;
        static START: OnceLock<Instant> = OnceLock::new();
        let start = START.get_or_init(Instant::now);
        CycleStamp(start.elapsed().as_nanos() as u64)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Seconds after the process epoch, for JSON rendering.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    #[cfg(test)]
    pub(crate) fn from_nanos(nanos: u64) -> CycleStamp {
        CycleStamp(nanos)
    }
}

/// A typed diagnostic event.
///
/// Usually an enum: `KIND_COUNT` is the number of variants and `kind`
/// returns a variant's declaration-order index. The collector groups a
/// trace's output by kind, in declaration order.
pub trait TraceEvent: Clone + Send + 'static {
    /// Number of event kinds this type can produce.
    const KIND_COUNT: usize;

    /// Declaration-order index of this value's kind; `< KIND_COUNT`.
    fn kind(&self) -> usize;

    /// Approximate bytes this event pins in an observer's buffer.
    fn memory_usage(&self) -> usize;

    /// Render the event's fields into a JSON object. The collector adds
    /// the `timestamp` field itself.
    fn render(&self, object: &mut Map<String, Value>);
}

/// Per-observer configuration, built from the observer's argument map.
pub trait TraceConfig<E: TraceEvent>: Send + Sized + 'static {
    fn from_args(args: &BTreeMap<String, String>) -> Self;

    /// Called under the collector lock after each append. Returning true
    /// completes the observer's trace with the data captured so far.
    fn finishes(&self, log: &EventLog<E>) -> bool {
        let _ = log;
        false
    }
}

/// One observer's captured events: a buffer per kind, each in insertion
/// order.
pub struct EventLog<E> {
    kinds: Vec<Vec<(CycleStamp, E)>>,
}

impl<E: TraceEvent> EventLog<E> {
    pub(crate) fn new() -> EventLog<E> {
        EventLog {
            kinds: (0..E::KIND_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    pub(crate) fn push(&mut self, stamp: CycleStamp, event: E) {
        let kind = event.kind();
        debug_assert!(kind < E::KIND_COUNT);
        self.kinds[kind].push((stamp, event));
    }

    /// Total captured events across kinds.
    pub fn len(&self) -> usize {
        self.kinds.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events of one kind, insertion-ordered.
    pub fn events(&self, kind: usize) -> &[(CycleStamp, E)] {
        &self.kinds[kind]
    }

    /// Approximate bytes held across all buffers.
    pub fn memory_usage(&self) -> usize {
        self.kinds
            .iter()
            .flatten()
            .map(|(_, e)| e.memory_usage())
            .sum()
    }

    /// Render the whole log: a JSON array grouped by kind in declaration
    /// order, insertion order within each kind, one `timestamp` per entry.
    pub(crate) fn render(&self) -> Value {
        let mut results = Vec::with_capacity(self.len());
        for bucket in &self.kinds {
            for (stamp, event) in bucket {
                let mut object = Map::new();
                object.insert(
                    "timestamp".to_string(),
                    Value::from(stamp.as_secs_f64()),
                );
                event.render(&mut object);
                results.push(Value::Object(object));
            }
        }
        Value::Array(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    enum Probe {
        A(u32),
        B(&'static str),
    }

    impl TraceEvent for Probe {
        const KIND_COUNT: usize = 2;

        fn kind(&self) -> usize {
            match self {
                Probe::A(_) => 0,
                Probe::B(_) => 1,
            }
        }

        fn memory_usage(&self) -> usize {
            std::mem::size_of::<Self>()
        }

        fn render(&self, object: &mut Map<String, Value>) {
            match self {
                Probe::A(n) => {
                    object.insert("a".into(), Value::from(*n));
                }
                Probe::B(s) => {
                    object.insert("b".into(), Value::from(*s));
                }
            }
        }
    }

    #[test]
    fn test_render_groups_by_kind_in_insertion_order() {
        let mut log = EventLog::<Probe>::new();
        log.push(CycleStamp::from_nanos(1), Probe::B("first-b"));
        log.push(CycleStamp::from_nanos(2), Probe::A(1));
        log.push(CycleStamp::from_nanos(3), Probe::B("second-b"));
        log.push(CycleStamp::from_nanos(4), Probe::A(2));

        let rendered = log.render();
        let array = rendered.as_array().unwrap();
        assert_eq!(array.len(), 4);
        // Kind A first (declaration order), then kind B; each in insertion
        // order.
        assert_eq!(array[0]["a"], 1);
        assert_eq!(array[1]["a"], 2);
        assert_eq!(array[2]["b"], "first-b");
        assert_eq!(array[3]["b"], "second-b");
        for entry in array {
            assert!(entry.get("timestamp").is_some());
        }
    }

    #[test]
    fn test_memory_usage_sums_events() {
        let mut log = EventLog::<Probe>::new();
        assert_eq!(log.memory_usage(), 0);
        log.push(CycleStamp::now(), Probe::A(1));
        log.push(CycleStamp::now(), Probe::B("x"));
        assert_eq!(log.memory_usage(), 2 * std::mem::size_of::<Probe>());
    }

    #[test]
    fn test_cycle_stamp_monotonic() {
        let a = CycleStamp::now();
        let b = CycleStamp::now();
        assert!(b >= a);
    }
}
