//! Coroutine adapters and combinators.

use std::fmt;

use crate::error::BoxError;
use crate::step::{BoxedCoroutine, Context, Coroutine, Step};

/// Build a coroutine from a closure that is called once per step.
pub fn from_fn<F>(f: F) -> FnCoroutine<F>
where
    F: FnMut(&mut Context<'_>) -> Result<Step, BoxError>,
{
    FnCoroutine(f)
}

pub struct FnCoroutine<F>(F);

impl<F> Coroutine for FnCoroutine<F>
where
    F: FnMut(&mut Context<'_>) -> Result<Step, BoxError>,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        (self.0)(cx)
    }
}

impl<F> fmt::Debug for FnCoroutine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCoroutine")
    }
}

/// Holds a parked coroutine until a condition turns true, then swaps it
/// back in. Installed by [`Step::wait_until`].
pub struct PollUntil<P> {
    condition: P,
    parked: Option<BoxedCoroutine>,
}

impl<P> PollUntil<P>
where
    P: FnMut() -> bool,
{
    pub fn new(condition: P, parked: BoxedCoroutine) -> Self {
        PollUntil {
            condition,
            parked: Some(parked),
        }
    }
}

impl<P> Coroutine for PollUntil<P>
where
    P: FnMut() -> bool,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        if !(self.condition)() {
            return Ok(cx.next_frame());
        }
        let parked = self
            .parked
            .take()
            .ok_or("wait_until polled after its coroutine was restored")?;
        Ok(Step::switch_to_boxed(parked))
    }
}

/// Runs `inner` only while `keep_running` holds; finishes silently otherwise.
pub struct CancelWith<C, P> {
    inner: C,
    keep_running: P,
}

impl<C, P> Coroutine for CancelWith<C, P>
where
    C: Coroutine,
    P: FnMut() -> bool,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> Result<Step, BoxError> {
        if !(self.keep_running)() {
            return Ok(Step::Done);
        }
        self.inner.resume(cx)
    }
}

pub trait CoroutineExt: Coroutine + Sized {
    /// Stop the coroutine before any step at which `keep_running` returns false.
    fn cancel_with<P>(self, keep_running: P) -> CancelWith<Self, P>
    where
        P: FnMut() -> bool,
    {
        CancelWith {
            inner: self,
            keep_running,
        }
    }

    fn boxed(self) -> BoxedCoroutine
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<C: Coroutine> CoroutineExt for C {}
