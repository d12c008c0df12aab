//! The scheduler: segment tables, clocks, handle registry, tags and waits.
//!
//! The host calls [`Timing::update`], [`Timing::fixed_update`] and
//! [`Timing::late_update`] once per frame phase. Each call makes one pass
//! over the segment's slots, stepping every eligible coroutine once (plus
//! any in-place replacements).
//!
//! Everything runs on the host thread. A coroutine body gets `&mut Timing`
//! through its [`Context`], so it may schedule, kill, pause or lock other
//! coroutines mid-pass. The driver takes the body out of its slot while it
//! runs and re-checks the slot's handle afterwards, so a body that kills
//! itself (or triggers `kill_all`) is simply dropped.

use std::collections::VecDeque;
use std::fmt;

use enum_map::EnumMap;

use crate::config::TimingConfig;
use crate::coroutine::CoroutineExt;
use crate::error::{BoxError, StepError, TimingError};
use crate::ids::{CoroutineHandle, InstanceKey, InstancePool, LockKey, ProcessIndex};
use crate::registry::HandleRegistry;
use crate::segment::{ClockSource, Segment, SegmentClock, SegmentTable, Slot};
use crate::step::{BoxedCoroutine, Context, Coroutine, Step};
use crate::tags::TagIndex;
use crate::wait_graph::{WaitGraph, WaitTarget};

/// Frame timing supplied by the host on every driver call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTime {
    /// Monotonic host frame counter.
    pub frame: u64,
    /// Scaled seconds elapsed since the previous frame.
    pub delta_time: f64,
    /// Unscaled seconds since host start; drives `SlowUpdate`.
    pub realtime: f64,
}

impl FrameTime {
    pub fn new(frame: u64, delta_time: f64, realtime: f64) -> Self {
        FrameTime {
            frame,
            delta_time,
            realtime,
        }
    }

    /// The following frame, `delta_time` seconds later.
    pub fn next(self, delta_time: f64) -> Self {
        FrameTime {
            frame: self.frame + 1,
            delta_time,
            realtime: self.realtime + delta_time,
        }
    }
}

type ErrorHook = Box<dyn FnMut(StepError)>;
type PreExecuteHook = Box<dyn FnMut()>;

pub struct Timing {
    instance: InstanceKey,
    pool: InstancePool,
    config: TimingConfig,
    tables: EnumMap<Segment, SegmentTable>,
    clocks: EnumMap<ClockSource, SegmentClock>,
    registry: HandleRegistry,
    tags: TagIndex,
    waits: WaitGraph,
    frame: FrameTime,
    local_time: f64,
    delta_time: f64,
    updates_since_maintenance: u32,
    errors: VecDeque<StepError>,
    on_error: Option<ErrorHook>,
    on_pre_execute: Option<PreExecuteHook>,
}

impl Timing {
    /// Create a scheduler in its own private pool.
    pub fn new(config: TimingConfig) -> Result<Self, TimingError> {
        Self::in_pool(&InstancePool::new(), config)
    }

    /// Create a scheduler holding one of `pool`'s instance keys.
    ///
    /// Fails with [`TimingError::TooManyInstances`] when the pool is full.
    pub fn in_pool(pool: &InstancePool, config: TimingConfig) -> Result<Self, TimingError> {
        let instance = pool.acquire()?;
        let tables =
            EnumMap::from_fn(|segment| SegmentTable::new(config.capacity.for_segment(segment)));
        log::debug!("timing instance {instance} created");
        Ok(Timing {
            instance,
            pool: pool.clone(),
            config,
            tables,
            clocks: EnumMap::default(),
            registry: HandleRegistry::new(instance),
            tags: TagIndex::new(),
            waits: WaitGraph::new(),
            frame: FrameTime::default(),
            local_time: 0.0,
            delta_time: 0.0,
            updates_since_maintenance: 0,
            errors: VecDeque::new(),
            on_error: None,
            on_pre_execute: None,
        })
    }

    pub fn instance(&self) -> InstanceKey {
        self.instance
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    // === Hooks ===

    /// Route step errors to `hook` instead of queueing them.
    pub fn set_on_error<F>(&mut self, hook: F)
    where
        F: FnMut(StepError) + 'static,
    {
        self.on_error = Some(Box::new(hook));
    }

    pub fn clear_on_error(&mut self) {
        self.on_error = None;
    }

    /// Called at the start of every driver call.
    pub fn set_on_pre_execute<F>(&mut self, hook: F)
    where
        F: FnMut() + 'static,
    {
        self.on_pre_execute = Some(Box::new(hook));
    }

    pub fn clear_on_pre_execute(&mut self) {
        self.on_pre_execute = None;
    }

    /// Errors waiting to be returned by a driver call.
    pub fn pending_errors(&self) -> usize {
        self.errors.len()
    }

    // === Scheduling ===

    /// Schedule `coroutine` in `Update` with no tag.
    pub fn run_coroutine<C>(&mut self, coroutine: C) -> CoroutineHandle
    where
        C: Coroutine + 'static,
    {
        self.schedule(Segment::Update, None, coroutine.boxed(), f64::NEG_INFINITY)
    }

    pub fn run_coroutine_in<C>(&mut self, segment: Segment, coroutine: C) -> CoroutineHandle
    where
        C: Coroutine + 'static,
    {
        self.schedule(segment, None, coroutine.boxed(), f64::NEG_INFINITY)
    }

    pub fn run_coroutine_tagged<C>(
        &mut self,
        segment: Segment,
        tag: impl Into<String>,
        coroutine: C,
    ) -> CoroutineHandle
    where
        C: Coroutine + 'static,
    {
        self.schedule(
            segment,
            Some(tag.into()),
            coroutine.boxed(),
            f64::NEG_INFINITY,
        )
    }

    pub fn run_boxed(
        &mut self,
        segment: Segment,
        tag: Option<String>,
        coroutine: BoxedCoroutine,
    ) -> CoroutineHandle {
        self.schedule(segment, tag, coroutine, f64::NEG_INFINITY)
    }

    /// Place a body at the end of its segment table.
    ///
    /// A segment that is mid-pass picks the new slot up later in the same
    /// pass. With `prewarm` set, an idle segment steps it once right away.
    pub(crate) fn schedule(
        &mut self,
        segment: Segment,
        tag: Option<String>,
        body: BoxedCoroutine,
        resume_at: f64,
    ) -> CoroutineHandle {
        let index = ProcessIndex::new(segment, self.tables[segment].high_water());
        let handle = self.registry.allocate(index);
        let placed =
            self.tables[segment].push(Slot::new(handle, body, resume_at), self.config.chunk_size);
        debug_assert_eq!(placed, index.slot);
        if let Some(tag) = tag {
            self.tags.add_tag(tag, index);
        }
        crate::driver_trace!("schedule {handle} at {index}");

        if self.config.prewarm && !self.tables[segment].is_running() {
            // the caller may be mid-step in another segment
            let (local_time, delta_time) = (self.local_time, self.delta_time);
            self.tables[segment].set_running(true);
            self.advance_clock(segment);
            self.visit_slot(index);
            self.tables[segment].set_running(false);
            self.local_time = local_time;
            self.delta_time = delta_time;
        }
        handle
    }

    // === Kill ===

    /// Kill every coroutine and shrink the tables back to their initial capacity.
    ///
    /// Resets all clocks. Returns the number of coroutines killed.
    pub fn kill_all(&mut self) -> usize {
        let killed = self.registry.len();
        for (segment, table) in self.tables.iter_mut() {
            table.reset(self.config.capacity.for_segment(segment));
        }
        self.registry.release_all();
        self.tags.clear();
        self.waits.clear();
        self.reset_time_count();
        log::debug!("timing instance {} killed {killed} coroutines", self.instance);
        killed
    }

    /// Returns 1 if the coroutine was alive, 0 otherwise.
    pub fn kill_coroutine(&mut self, handle: CoroutineHandle) -> usize {
        match self.registry.resolve(handle) {
            Some(index) => usize::from(self.retire(index)),
            None => 0,
        }
    }

    pub fn kill_tag(&mut self, tag: &str) -> usize {
        let targets = self.tags.slots_with_tag(tag);
        targets
            .into_iter()
            .filter(|&index| self.retire(index))
            .count()
    }

    // === Pause / resume ===

    /// Returns the number of coroutines that went from running to paused.
    pub fn pause_all(&mut self) -> usize {
        let mut changed = 0;
        for table in self.tables.values_mut() {
            for (_, slot) in table.iter_mut() {
                changed += usize::from(apply_pause(slot, true));
            }
        }
        changed
    }

    /// Returns the number of coroutines that became runnable. Coroutines
    /// still blocked on a wait or lock are unpaused but not counted.
    pub fn resume_all(&mut self) -> usize {
        let mut changed = 0;
        for table in self.tables.values_mut() {
            for (_, slot) in table.iter_mut() {
                changed += usize::from(apply_pause(slot, false));
            }
        }
        changed
    }

    pub fn pause_tag(&mut self, tag: &str) -> usize {
        self.set_paused_for_tag(tag, true)
    }

    pub fn resume_tag(&mut self, tag: &str) -> usize {
        self.set_paused_for_tag(tag, false)
    }

    pub fn pause_coroutine(&mut self, handle: CoroutineHandle) -> bool {
        self.set_paused(handle, true)
    }

    pub fn resume_coroutine(&mut self, handle: CoroutineHandle) -> bool {
        self.set_paused(handle, false)
    }

    fn set_paused_for_tag(&mut self, tag: &str, paused: bool) -> usize {
        let mut changed = 0;
        for index in self.tags.slots_with_tag(tag) {
            if let Some(slot) = self.tables[index.segment].get_mut(index.slot) {
                changed += usize::from(apply_pause(slot, paused));
            }
        }
        changed
    }

    fn set_paused(&mut self, handle: CoroutineHandle, paused: bool) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => apply_pause(slot, paused),
            None => false,
        }
    }

    // === Locks ===

    /// Block `handle` until `key` is unlocked.
    ///
    /// Any sleep it had left is remembered and re-applied on unlock. A
    /// coroutine may hold several keys and runs again only once all are
    /// released. Returns false for dead or foreign handles or a key the
    /// coroutine already holds.
    pub fn lock_coroutine(&mut self, handle: CoroutineHandle, key: LockKey) -> bool {
        self.add_waiter(WaitTarget::Lock(key), handle)
    }

    pub fn unlock_coroutine(&mut self, handle: CoroutineHandle, key: LockKey) -> bool {
        match self.waits.remove_waiter(WaitTarget::Lock(key), handle) {
            Some(waiter) => {
                self.release_waiter(waiter);
                true
            }
            None => false,
        }
    }

    // === Queries ===

    /// Whether `handle` refers to a live coroutine of this scheduler.
    pub fn is_running(&self, handle: CoroutineHandle) -> bool {
        self.registry.resolve(handle).is_some()
    }

    pub fn is_paused(&self, handle: CoroutineHandle) -> bool {
        self.slot(handle).is_some_and(|slot| slot.paused)
    }

    /// Whether `handle` is waiting on another coroutine or a lock key.
    pub fn is_blocked(&self, handle: CoroutineHandle) -> bool {
        self.slot(handle).is_some_and(Slot::is_blocked)
    }

    pub fn resolve(&self, handle: CoroutineHandle) -> Option<ProcessIndex> {
        self.registry.resolve(handle)
    }

    pub fn tag_of(&self, handle: CoroutineHandle) -> Option<&str> {
        let index = self.registry.resolve(handle)?;
        self.tags.tag_of(index)
    }

    pub fn live_count(&self, segment: Segment) -> usize {
        self.tables[segment].live()
    }

    pub fn high_water(&self, segment: Segment) -> usize {
        self.tables[segment].high_water()
    }

    /// Number of live coroutines across all segments.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn slot(&self, handle: CoroutineHandle) -> Option<&Slot> {
        let index = self.registry.resolve(handle)?;
        self.tables[index.segment].get(index.slot)
    }

    fn slot_mut(&mut self, handle: CoroutineHandle) -> Option<&mut Slot> {
        let index = self.registry.resolve(handle)?;
        self.tables[index.segment].get_mut(index.slot)
    }

    // === Time ===

    /// Local time of the segment most recently driven.
    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Resume time `seconds` from now, for use with [`Step::Continue`].
    pub fn wait_for_seconds(&self, seconds: f64) -> f64 {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds };
        self.local_time + seconds
    }

    /// The time `segment` reads now, or will read on its next pass if it
    /// has not been driven yet this frame.
    pub fn segment_time(&self, segment: Segment) -> f64 {
        let clock = &self.clocks[segment.clock()];
        match segment.clock() {
            ClockSource::Realtime => self.frame.realtime,
            ClockSource::Frame | ClockSource::Fixed => {
                if clock.frame == Some(self.frame.frame) {
                    clock.last_time
                } else {
                    clock.last_time + self.frame.delta_time
                }
            }
        }
    }

    /// Zero every segment clock.
    pub fn reset_time_count(&mut self) {
        for clock in self.clocks.values_mut() {
            clock.reset();
        }
        self.local_time = 0.0;
        self.delta_time = 0.0;
    }

    pub(crate) fn clock_time(&self, segment: Segment) -> f64 {
        self.clocks[segment.clock()].last_time
    }

    pub(crate) fn clock_delta(&self, segment: Segment) -> f64 {
        self.clocks[segment.clock()].delta_time
    }

    fn advance_clock(&mut self, segment: Segment) {
        let frame = self.frame;
        let source = segment.clock();
        let clock = &mut self.clocks[source];
        match source {
            ClockSource::Frame | ClockSource::Fixed => {
                if clock.frame != Some(frame.frame) {
                    clock.last_time += frame.delta_time;
                    clock.frame = Some(frame.frame);
                }
                clock.delta_time = frame.delta_time;
            }
            ClockSource::Realtime => {
                if clock.frame != Some(frame.frame) {
                    clock.delta_time = frame.realtime - clock.last_time;
                    clock.last_time = frame.realtime;
                    clock.frame = Some(frame.frame);
                }
            }
        }
        self.local_time = clock.last_time;
        self.delta_time = clock.delta_time;
    }

    // === Driver ===

    /// Drive the `Update` segment, plus `SlowUpdate` when its interval has
    /// elapsed. Compacts the tables every `maintenance_interval` calls.
    pub fn update(&mut self, frame: FrameTime) -> Result<(), TimingError> {
        if self.tables[Segment::Update].is_running() {
            log::warn!("update called re-entrantly from inside the update pass; ignoring");
            return Ok(());
        }
        self.frame = frame;
        self.pre_execute();

        let slow = &self.tables[Segment::SlowUpdate];
        let slow_due = self.clocks[ClockSource::Realtime].last_time
            + self.config.slow_update_interval
            < frame.realtime;
        if slow_due && slow.high_water() > 0 && !slow.is_running() {
            self.drive(Segment::SlowUpdate);
        }

        self.drive(Segment::Update);

        self.updates_since_maintenance += 1;
        if self.updates_since_maintenance >= self.config.maintenance_interval {
            self.updates_since_maintenance = 0;
            self.compact();
        }
        self.raise_queued_error()
    }

    pub fn fixed_update(&mut self, frame: FrameTime) -> Result<(), TimingError> {
        self.run_segment(Segment::FixedUpdate, frame)
    }

    pub fn late_update(&mut self, frame: FrameTime) -> Result<(), TimingError> {
        self.run_segment(Segment::LateUpdate, frame)
    }

    /// Make one pass over `segment`.
    ///
    /// A call for a segment that is already mid-pass is ignored. Returns the
    /// oldest queued step error, if any and no error hook is installed.
    pub fn run_segment(&mut self, segment: Segment, frame: FrameTime) -> Result<(), TimingError> {
        if self.tables[segment].is_running() {
            log::warn!("{segment} pass requested while it is already running; ignoring");
            return Ok(());
        }
        self.frame = frame;
        self.pre_execute();
        self.drive(segment);
        self.raise_queued_error()
    }

    fn pre_execute(&mut self) {
        if let Some(hook) = self.on_pre_execute.as_mut() {
            hook();
        }
    }

    fn drive(&mut self, segment: Segment) {
        self.tables[segment].begin_pass();
        self.advance_clock(segment);
        let mut slot = 0usize;
        while slot < self.tables[segment].high_water() {
            self.visit_slot(ProcessIndex::new(segment, slot));
            slot += 1;
        }
        self.tables[segment].end_pass();
    }

    fn visit_slot(&mut self, index: ProcessIndex) {
        let segment = index.segment;
        loop {
            let now = self.clock_time(segment);
            let table = &mut self.tables[segment];
            let pass = table.passes();
            let Some(slot) = table.get_mut(index.slot) else {
                return;
            };
            if !slot.is_runnable(now, pass) {
                return;
            }
            let Some(mut body) = slot.body.take() else {
                return;
            };
            let handle = slot.handle;

            crate::driver_trace!("step {handle} at {index} t={now}");
            let result = body.resume(&mut Context::new(self, handle, segment));

            let still_ours = self.tables[segment]
                .get(index.slot)
                .is_some_and(|slot| slot.handle == handle);
            if !still_ours {
                // killed during its own step
                drop(body);
                if let Err(source) = result {
                    self.report_error(handle, segment, source);
                }
                return;
            }

            match result {
                Ok(Step::Continue(resume_at)) => {
                    let resume_at = if resume_at.is_nan() { now } else { resume_at };
                    self.restore(index, body, Some(resume_at));
                    return;
                }
                Ok(Step::Replace(replace)) => {
                    let next = replace(body, handle);
                    self.restore(index, next, None);
                }
                Ok(Step::WaitUntilDone(target)) => {
                    self.restore(index, body, None);
                    self.begin_wait(handle, target);
                    return;
                }
                Ok(Step::Done) => {
                    drop(body);
                    self.retire(index);
                    return;
                }
                Err(source) => {
                    drop(body);
                    self.retire(index);
                    self.report_error(handle, segment, source);
                    return;
                }
            }
        }
    }

    fn restore(&mut self, index: ProcessIndex, body: BoxedCoroutine, resume_at: Option<f64>) {
        if let Some(slot) = self.tables[index.segment].get_mut(index.slot) {
            slot.body = Some(body);
            if let Some(at) = resume_at {
                slot.resume_at = at;
            }
        }
    }

    /// Empty a slot and everything that refers to it. Coroutines waiting
    /// on it are released.
    fn retire(&mut self, index: ProcessIndex) -> bool {
        let Some(slot) = self.tables[index.segment].take(index.slot) else {
            return false;
        };
        let handle = slot.handle;
        self.registry.release(handle);
        self.tags.remove_tag(index);
        if slot.is_blocked() {
            self.waits.forget_waiter(handle);
        }
        for waiter in self.waits.take_waiters(WaitTarget::Coroutine(handle)) {
            self.release_waiter(waiter);
        }
        crate::driver_trace!("retire {handle} from {index}");
        true
    }

    fn report_error(&mut self, handle: CoroutineHandle, segment: Segment, source: BoxError) {
        let err = StepError::new(handle, segment, source);
        log::debug!("{err}");
        match self.on_error.as_mut() {
            Some(hook) => hook(err),
            None => self.errors.push_back(err),
        }
    }

    fn raise_queued_error(&mut self) -> Result<(), TimingError> {
        match self.errors.pop_front() {
            Some(err) => Err(TimingError::Coroutine(err)),
            None => Ok(()),
        }
    }

    // === Waits ===

    fn begin_wait(&mut self, waiter: CoroutineHandle, target: CoroutineHandle) -> bool {
        let rejection = if waiter == target {
            Some("a coroutine cannot wait for itself")
        } else if target.instance() != self.instance {
            Some("cannot wait for a coroutine of another scheduler instance")
        } else if self.registry.resolve(target).is_none() {
            Some("wait target is not running")
        } else {
            None
        };
        if let Some(reason) = rejection {
            if self.config.warn_on_wait_issue {
                log::warn!("{waiter} wait on {target} rejected: {reason}");
            }
            return false;
        }
        self.add_waiter(WaitTarget::Coroutine(target), waiter)
    }

    fn add_waiter(&mut self, target: WaitTarget, handle: CoroutineHandle) -> bool {
        let Some(index) = self.registry.resolve(handle) else {
            return false;
        };
        let now = self.segment_time(index.segment);
        let Some(slot) = self.tables[index.segment].get_mut(index.slot) else {
            return false;
        };
        if !self.waits.register(target, handle) {
            return false;
        }
        if slot.blocked_on == 0 {
            slot.held_delay = (slot.resume_at - now).max(0.0);
        }
        slot.blocked_on += 1;
        true
    }

    /// Drop one block from a waiter. It becomes eligible on its segment's
    /// next pass once nothing else holds it, with the delay it had left
    /// when it was first blocked.
    fn release_waiter(&mut self, handle: CoroutineHandle) {
        let Some(index) = self.registry.resolve(handle) else {
            return;
        };
        let now = self.segment_time(index.segment);
        let table = &mut self.tables[index.segment];
        let next_pass = table.passes() + 1;
        let Some(slot) = table.get_mut(index.slot) else {
            return;
        };
        slot.blocked_on = slot.blocked_on.saturating_sub(1);
        slot.ready_pass = slot.ready_pass.max(next_pass);
        if slot.blocked_on == 0 {
            if slot.held_delay > 0.0 {
                slot.resume_at = now + slot.held_delay;
            }
            slot.held_delay = 0.0;
        }
    }

    // === Maintenance ===

    /// Close the holes left by dead coroutines, keeping scheduling order.
    ///
    /// Handles and tags follow their coroutines. Does nothing while any
    /// segment is mid-pass. Returns the number of slots reclaimed.
    pub fn compact(&mut self) -> usize {
        if self.tables.values().any(SegmentTable::is_running) {
            return 0;
        }
        let Timing {
            tables,
            registry,
            tags,
            ..
        } = self;
        let mut reclaimed = 0usize;
        for (segment, table) in tables.iter_mut() {
            reclaimed += table.compact(|from, to, slot| {
                registry.relocate(slot.handle, ProcessIndex::new(segment, to));
                tags.move_tag(
                    ProcessIndex::new(segment, from),
                    ProcessIndex::new(segment, to),
                );
            });
        }
        if reclaimed > 0 {
            log::debug!("compaction reclaimed {reclaimed} slots");
        }
        reclaimed
    }
}

fn apply_pause(slot: &mut Slot, paused: bool) -> bool {
    if slot.paused == paused {
        return false;
    }
    slot.paused = paused;
    paused || !slot.is_blocked()
}

impl Drop for Timing {
    fn drop(&mut self) {
        self.pool.release(self.instance);
    }
}

impl fmt::Debug for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timing")
            .field("instance", &self.instance)
            .field("live", &self.registry.len())
            .field("frame", &self.frame)
            .field("local_time", &self.local_time)
            .field("pending_errors", &self.errors.len())
            .finish()
    }
}
