//! Step protocol between the driver and coroutine bodies.

use std::fmt;

use crate::coroutine::PollUntil;
use crate::error::BoxError;
use crate::ids::CoroutineHandle;
use crate::segment::Segment;
use crate::timing::Timing;

pub type BoxedCoroutine = Box<dyn Coroutine>;

/// Swaps the running coroutine for another one. Receives the current body
/// and its handle; whatever it returns continues in the same slot.
pub type Replacement = Box<dyn FnOnce(BoxedCoroutine, CoroutineHandle) -> BoxedCoroutine>;

/// Outcome of one coroutine step.
pub enum Step {
    /// Sleep until the segment's local time reaches the given value.
    /// Any value at or below the current time means "next tick"; NaN is
    /// treated as the current time.
    Continue(f64),
    /// Replace the body in place and re-examine the slot immediately.
    Replace(Replacement),
    /// Block until the given coroutine is gone.
    ///
    /// A wait on itself is rejected, and so is a wait on a coroutine that
    /// belongs to another scheduler or has already finished. The body then keeps its slot
    /// and is stepped again on the next tick, not re-examined in the same
    /// one, so a body that keeps yielding a rejected wait cannot stall a pass.
    WaitUntilDone(CoroutineHandle),
    Done,
}

/// A resumable computation driven by the scheduler.
pub trait Coroutine {
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError>;
}

impl Coroutine for BoxedCoroutine {
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        (**self).resume(cx)
    }
}

impl Step {
    pub fn replace_with<F>(replace: F) -> Self
    where
        F: FnOnce(BoxedCoroutine, CoroutineHandle) -> BoxedCoroutine + 'static,
    {
        Step::Replace(Box::new(replace))
    }

    /// Drop the current body and continue as `next`.
    pub fn switch_to<C: Coroutine + 'static>(next: C) -> Self {
        Step::switch_to_boxed(Box::new(next))
    }

    pub fn switch_to_boxed(next: BoxedCoroutine) -> Self {
        Step::replace_with(move |_current, _handle| next)
    }

    /// Park the current body until `condition` returns true, polling once per tick.
    pub fn wait_until<P>(condition: P) -> Self
    where
        P: FnMut() -> bool + 'static,
    {
        Step::replace_with(move |current, _handle| Box::new(PollUntil::new(condition, current)))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done)
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Step::Continue(_))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Continue(at) => f.debug_tuple("Continue").field(at).finish(),
            Step::Replace(_) => f.write_str("Replace(..)"),
            Step::WaitUntilDone(handle) => f.debug_tuple("WaitUntilDone").field(handle).finish(),
            Step::Done => f.write_str("Done"),
        }
    }
}

/// What a coroutine body sees while it is being stepped.
///
/// Holds the scheduler mutably, so a body may schedule, kill, pause or
/// lock other coroutines (itself included) from inside its step.
pub struct Context<'a> {
    timing: &'a mut Timing,
    handle: CoroutineHandle,
    segment: Segment,
}

impl<'a> Context<'a> {
    pub(crate) fn new(timing: &'a mut Timing, handle: CoroutineHandle, segment: Segment) -> Self {
        Context {
            timing,
            handle,
            segment,
        }
    }

    /// Handle of the coroutine being stepped.
    pub fn handle(&self) -> CoroutineHandle {
        self.handle
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Local time of the segment being driven.
    pub fn local_time(&self) -> f64 {
        self.timing.clock_time(self.segment)
    }

    pub fn delta_time(&self) -> f64 {
        self.timing.clock_delta(self.segment)
    }

    /// Sleep for `seconds` of this segment's local time. NaN sleeps zero seconds.
    pub fn wait_for_seconds(&self, seconds: f64) -> Step {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds };
        Step::Continue(self.local_time() + seconds)
    }

    /// Resume on the next tick of this segment.
    pub fn next_frame(&self) -> Step {
        Step::Continue(self.local_time())
    }

    pub fn timing(&mut self) -> &mut Timing {
        &mut *self.timing
    }
}
