//! Wait graph: which coroutines are blocked on which targets.
//!
//! Keyed by handle rather than slot index, so compaction never has to
//! rewrite it. Entries are removed eagerly when either side dies.

use std::collections::HashMap;

use crate::ids::{CoroutineHandle, LockKey};

/// What a coroutine can be blocked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitTarget {
    /// Another coroutine of the same scheduler; released when it dies.
    Coroutine(CoroutineHandle),
    /// A lock key; released only by an explicit unlock.
    Lock(LockKey),
}

#[derive(Debug, Default)]
pub struct WaitGraph {
    waiters: HashMap<WaitTarget, Vec<CoroutineHandle>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `waiter` as blocked on `target`.
    ///
    /// Returns false if the same coroutine is already waiting on this target.
    pub fn register(&mut self, target: WaitTarget, waiter: CoroutineHandle) -> bool {
        let list = self.waiters.entry(target).or_default();
        if list.contains(&waiter) {
            return false;
        }
        list.push(waiter);
        true
    }

    /// Remove one waiter from one target.
    pub fn remove_waiter(
        &mut self,
        target: WaitTarget,
        handle: CoroutineHandle,
    ) -> Option<CoroutineHandle> {
        let list = self.waiters.get_mut(&target)?;
        let pos = list.iter().position(|&w| w == handle)?;
        let waiter = list.remove(pos);
        if list.is_empty() {
            self.waiters.remove(&target);
        }
        Some(waiter)
    }

    /// Remove and return everyone waiting on `target`, in registration order.
    pub fn take_waiters(&mut self, target: WaitTarget) -> Vec<CoroutineHandle> {
        self.waiters.remove(&target).unwrap_or_default()
    }

    /// Drop every entry in which `handle` is the waiter. Returns how many were dropped.
    pub fn forget_waiter(&mut self, handle: CoroutineHandle) -> usize {
        let mut dropped = 0usize;
        self.waiters.retain(|_, list| {
            let before = list.len();
            list.retain(|&w| w != handle);
            dropped += before - list.len();
            !list.is_empty()
        });
        dropped
    }

    pub fn waiters_of(&self, target: WaitTarget) -> &[CoroutineHandle] {
        self.waiters.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_waiters(&self, target: WaitTarget) -> bool {
        self.waiters.contains_key(&target)
    }

    pub fn is_waiting(&self, handle: CoroutineHandle) -> bool {
        self.waiters
            .values()
            .any(|list| list.contains(&handle))
    }

    /// Number of targets with at least one waiter.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn clear(&mut self) {
        self.waiters.clear();
    }
}
