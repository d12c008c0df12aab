//! Delayed and repeating calls built on top of the scheduler.

use crate::error::BoxError;
use crate::ids::CoroutineHandle;
use crate::segment::Segment;
use crate::step::{Context, Coroutine, Step};
use crate::timing::Timing;

/// Slack allowed when comparing a tick against the end of a repeat window,
/// so accumulated float error does not drop the final call.
const WINDOW_EPSILON: f64 = 1e-6;

type OnDone = Box<dyn FnOnce(&mut Context<'_>)>;

/// Schedule for [`Timing::call_repeating`].
pub struct Repeat {
    period: f64,
    timeframe: Option<f64>,
    segment: Segment,
    on_done: Option<OnDone>,
}

impl Repeat {
    /// Call every `period` seconds. A period of zero calls on every tick.
    pub fn every(period: f64) -> Self {
        Repeat {
            period: if period.is_nan() { 0.0 } else { period.max(0.0) },
            timeframe: None,
            segment: Segment::Update,
            on_done: None,
        }
    }

    pub fn continuously() -> Self {
        Self::every(0.0)
    }

    /// Stop after `timeframe` seconds. Without one the call repeats until killed.
    pub fn for_duration(mut self, timeframe: f64) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn in_segment(mut self, segment: Segment) -> Self {
        self.segment = segment;
        self
    }

    /// Run once when the timeframe runs out. Not called if the call is killed.
    pub fn on_done<F>(mut self, on_done: F) -> Self
    where
        F: FnOnce(&mut Context<'_>) + 'static,
    {
        self.on_done = Some(Box::new(on_done));
        self
    }
}

struct DelayedCall<F> {
    action: Option<F>,
}

impl<F> Coroutine for DelayedCall<F>
where
    F: FnOnce(&mut Context<'_>),
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        if let Some(action) = self.action.take() {
            action(cx);
        }
        Ok(Step::Done)
    }
}

struct RepeatingCall<F> {
    action: F,
    period: f64,
    ends_at: Option<f64>,
    on_done: Option<OnDone>,
}

impl<F> RepeatingCall<F> {
    fn expired(&self, time: f64) -> bool {
        self.ends_at
            .is_some_and(|end| time > end + WINDOW_EPSILON)
    }

    fn finish(&mut self, cx: &mut Context<'_>) -> Step {
        if let Some(on_done) = self.on_done.take() {
            on_done(cx);
        }
        Step::Done
    }
}

impl<F> Coroutine for RepeatingCall<F>
where
    F: FnMut(&mut Context<'_>),
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        let now = cx.local_time();
        if self.expired(now) {
            return Ok(self.finish(cx));
        }
        (self.action)(cx);
        let next = now + self.period;
        if self.expired(next) {
            return Ok(self.finish(cx));
        }
        Ok(Step::Continue(next))
    }
}

impl Timing {
    /// Run `action` once after `delay` seconds of `Update` time.
    pub fn call_delayed<F>(&mut self, delay: f64, action: F) -> CoroutineHandle
    where
        F: FnOnce(&mut Context<'_>) + 'static,
    {
        self.call_delayed_in(Segment::Update, delay, action)
    }

    pub fn call_delayed_in<F>(&mut self, segment: Segment, delay: f64, action: F) -> CoroutineHandle
    where
        F: FnOnce(&mut Context<'_>) + 'static,
    {
        let delay = if delay.is_nan() { 0.0 } else { delay };
        let resume_at = self.segment_time(segment) + delay;
        self.schedule(
            segment,
            None,
            Box::new(DelayedCall {
                action: Some(action),
            }),
            resume_at,
        )
    }

    /// Call `action` every `period` seconds, for `timeframe` seconds if given.
    ///
    /// The first call happens one period after scheduling.
    pub fn call_periodically<F>(
        &mut self,
        timeframe: Option<f64>,
        period: f64,
        action: F,
    ) -> CoroutineHandle
    where
        F: FnMut(&mut Context<'_>) + 'static,
    {
        let repeat = Repeat::every(period);
        let repeat = match timeframe {
            Some(timeframe) => repeat.for_duration(timeframe),
            None => repeat,
        };
        self.call_repeating(repeat, action)
    }

    /// Call `action` on every tick, for `timeframe` seconds if given.
    pub fn call_continuously<F>(&mut self, timeframe: Option<f64>, action: F) -> CoroutineHandle
    where
        F: FnMut(&mut Context<'_>) + 'static,
    {
        self.call_periodically(timeframe, 0.0, action)
    }

    pub fn call_repeating<F>(&mut self, repeat: Repeat, action: F) -> CoroutineHandle
    where
        F: FnMut(&mut Context<'_>) + 'static,
    {
        let start = self.segment_time(repeat.segment);
        let body = RepeatingCall {
            action,
            period: repeat.period,
            ends_at: repeat.timeframe.map(|timeframe| start + timeframe),
            on_done: repeat.on_done,
        };
        self.schedule(repeat.segment, None, Box::new(body), start + repeat.period)
    }
}
