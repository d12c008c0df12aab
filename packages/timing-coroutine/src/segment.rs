//! Update segments and their slot tables.
//!
//! A segment is one phase of the host frame. Each segment owns a growable
//! table of slots; a slot is either empty or holds one live coroutine.

use std::fmt;

use enum_map::Enum;
use serde::{Deserialize, Serialize};

use crate::ids::CoroutineHandle;
use crate::step::BoxedCoroutine;

/// Host loop phase a coroutine is driven from.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Update,
    FixedUpdate,
    LateUpdate,
    SlowUpdate,
}

/// Which clock a segment reads its local time from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Enum)]
pub enum ClockSource {
    /// Shared by `Update` and `LateUpdate`.
    Frame,
    Fixed,
    /// Wall time supplied by the host; used by `SlowUpdate`.
    Realtime,
}

impl Segment {
    pub const ALL: [Segment; 4] = [
        Segment::Update,
        Segment::FixedUpdate,
        Segment::LateUpdate,
        Segment::SlowUpdate,
    ];

    pub fn clock(self) -> ClockSource {
        match self {
            Segment::Update | Segment::LateUpdate => ClockSource::Frame,
            Segment::FixedUpdate => ClockSource::Fixed,
            Segment::SlowUpdate => ClockSource::Realtime,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Update => "update",
            Segment::FixedUpdate => "fixed_update",
            Segment::LateUpdate => "late_update",
            Segment::SlowUpdate => "slow_update",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-clock time bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentClock {
    pub last_time: f64,
    pub delta_time: f64,
    /// Host frame the clock was last advanced on.
    pub frame: Option<u64>,
}

impl SegmentClock {
    pub fn reset(&mut self) {
        *self = SegmentClock::default();
    }
}

/// One live coroutine and its scheduling state.
pub struct Slot {
    pub handle: CoroutineHandle,
    /// `None` only while the coroutine is being stepped.
    pub body: Option<BoxedCoroutine>,
    /// Local time at or after which the coroutine may step.
    pub resume_at: f64,
    pub paused: bool,
    /// Number of wait-graph entries (coroutines or lock keys) holding this slot.
    pub blocked_on: u32,
    /// Delay that was left when the first block was taken; re-applied when the last one goes.
    pub held_delay: f64,
    /// Earliest segment pass this slot may step in.
    pub ready_pass: u64,
}

impl Slot {
    pub fn new(handle: CoroutineHandle, body: BoxedCoroutine, resume_at: f64) -> Self {
        Slot {
            handle,
            body: Some(body),
            resume_at,
            paused: false,
            blocked_on: 0,
            held_delay: 0.0,
            ready_pass: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_on > 0
    }

    /// Whether the driver may step this slot at `now` during pass `pass`.
    pub fn is_runnable(&self, now: f64, pass: u64) -> bool {
        !self.paused
            && !self.is_blocked()
            && self.ready_pass <= pass
            && self.resume_at <= now
            && self.body.is_some()
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("handle", &self.handle)
            .field("stepping", &self.body.is_none())
            .field("resume_at", &self.resume_at)
            .field("paused", &self.paused)
            .field("blocked_on", &self.blocked_on)
            .field("held_delay", &self.held_delay)
            .field("ready_pass", &self.ready_pass)
            .finish()
    }
}

/// Growable slot table for one segment.
///
/// Slots `[0, high_water)` may be occupied; everything above is empty.
/// Order of occupied slots is scheduling order and survives compaction.
#[derive(Debug)]
pub struct SegmentTable {
    slots: Vec<Option<Slot>>,
    high_water: usize,
    live: usize,
    expansions: usize,
    running: bool,
    passes: u64,
}

impl SegmentTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity, || None);
        SegmentTable {
            slots,
            high_water: 0,
            live: 0,
            expansions: 1,
            running: false,
            passes: 0,
        }
    }

    /// Place `slot` at the high-water mark, growing by
    /// `chunk_size * expansions` when the table is full.
    pub fn push(&mut self, slot: Slot, chunk_size: usize) -> usize {
        if self.high_water >= self.slots.len() {
            let grow = chunk_size.max(1) * self.expansions;
            self.expansions += 1;
            let new_len = self.slots.len() + grow;
            self.slots.resize_with(new_len, || None);
        }
        let index = self.high_water;
        self.slots[index] = Some(slot);
        self.high_water += 1;
        self.live += 1;
        index
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Empty a slot. The high-water mark is left alone until compaction.
    pub fn take(&mut self, index: usize) -> Option<Slot> {
        let taken = self.slots.get_mut(index).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots[..self.high_water]
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|slot| (idx, slot)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Slot)> {
        self.slots[..self.high_water]
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|slot| (idx, slot)))
    }

    /// Slide live slots down over the holes, keeping their relative order.
    ///
    /// `moved(from, to, slot)` is called for every slot that changes index.
    /// Returns the number of slots reclaimed.
    pub fn compact(&mut self, mut moved: impl FnMut(usize, usize, &Slot)) -> usize {
        let mut inner = 0usize;
        for outer in 0..self.high_water {
            let Some(slot) = self.slots[outer].take() else {
                continue;
            };
            if outer != inner {
                moved(outer, inner, &slot);
            }
            self.slots[inner] = Some(slot);
            inner += 1;
        }
        let reclaimed = self.high_water - inner;
        self.high_water = inner;
        reclaimed
    }

    /// Drop every slot and shrink back to `capacity`.
    ///
    /// The pass counter and running flag survive: a reset may happen from
    /// inside this segment's own pass.
    pub fn reset(&mut self, capacity: usize) {
        self.slots.clear();
        self.slots.resize_with(capacity, || None);
        self.high_water = 0;
        self.live = 0;
        self.expansions = self.expansions / 2 + 1;
    }

    pub fn begin_pass(&mut self) {
        self.running = true;
        self.passes += 1;
    }

    pub fn end_pass(&mut self) {
        self.running = false;
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
