//! Timer handle and shared state

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempo_core::{TaskCallback, Timestamp};

/// Sentinel for "not stored at any index".
pub(crate) const INVALID_INDEX: usize = usize::MAX;

/// Which internal collection currently holds a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Slot {
    /// Not in any collection (fired, cancelled, or never inserted).
    Detached = 0,
    /// In a sharded-list heap; `index` is the heap position.
    Heap = 1,
    /// In a sharded-list overflow vector; `index` is the vector position.
    Overflow = 2,
    /// In a slacked-list bucket; `tick` names the bucket, `index` the
    /// position within it.
    Bucket = 3,
}

impl Slot {
    fn from_u8(value: u8) -> Slot {
        match value {
            1 => Slot::Heap,
            2 => Slot::Overflow,
            3 => Slot::Bucket,
            _ => Slot::Detached,
        }
    }
}

/// Shared state behind a [`Timer`] handle.
///
/// Every field except `callback` is only mutated while the owning shard's
/// mutex is held; the atomics exist so the type stays `Sync` without a
/// second lock, not for lock-free access. `Relaxed` ordering is sufficient
/// because the shard mutex provides the happens-before edges.
pub(crate) struct TimerState {
    pub(crate) deadline: AtomicI64,
    pub(crate) pending: AtomicBool,
    pub(crate) slot: AtomicU8,
    pub(crate) index: AtomicUsize,
    pub(crate) tick: AtomicU64,
    pub(crate) callback: Mutex<Option<TaskCallback>>,
}

impl TimerState {
    pub(crate) fn new(deadline: Timestamp, callback: TaskCallback) -> Arc<TimerState> {
        Arc::new(TimerState {
            deadline: AtomicI64::new(deadline.as_millis()),
            pending: AtomicBool::new(false),
            slot: AtomicU8::new(Slot::Detached as u8),
            index: AtomicUsize::new(INVALID_INDEX),
            tick: AtomicU64::new(0),
            callback: Mutex::new(Some(callback)),
        })
    }

    #[inline]
    pub(crate) fn deadline(&self) -> Timestamp {
        Timestamp::from_millis(self.deadline.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_deadline(&self, deadline: Timestamp) {
        self.deadline.store(deadline.as_millis(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn slot(&self) -> Slot {
        Slot::from_u8(self.slot.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_slot(&self, slot: Slot) {
        self.slot.store(slot as u8, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    /// Take the callback for dispatch. Returns `None` if it was already
    /// taken - each timer fires at most once.
    pub(crate) fn take_callback(&self) -> Option<TaskCallback> {
        self.callback.lock().unwrap().take()
    }
}

/// Caller-held handle to a scheduled timer.
///
/// Created by a timer list's `init`; pass it back to `cancel` or `extend`.
/// Dropping the handle does not cancel the timer.
pub struct Timer {
    pub(crate) state: Arc<TimerState>,
}

impl Timer {
    /// The deadline the timer is currently scheduled for.
    pub fn deadline(&self) -> Timestamp {
        self.state.deadline()
    }

    /// Whether the timer is still waiting to fire. Advisory: the answer may
    /// be stale by the time the caller acts on it.
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.state.deadline())
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Shard selection: hash the timer state's stable heap address.
///
/// Fibonacci multiplicative hashing spreads consecutive allocations across
/// shards even when the allocator hands out nearby addresses.
#[inline]
pub(crate) fn shard_index(state: &Arc<TimerState>, num_shards: usize) -> usize {
    let addr = Arc::as_ptr(state) as usize as u64;
    (addr.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize % num_shards
}

/// Default shard count: twice the core count, clamped to a sane range.
pub(crate) fn default_shard_count() -> usize {
    (2 * num_cpus::get()).clamp(1, 32)
}
