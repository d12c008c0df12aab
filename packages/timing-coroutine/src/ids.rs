//! Core identifier types for the scheduler.
//!
//! All IDs are lightweight Copy types; none of them own resources.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use generational_arena::Index;

use crate::error::TimingError;
use crate::segment::Segment;

/// Maximum number of schedulers that may be alive in one [`InstancePool`].
pub const MAX_INSTANCES: u8 = 31;

/// Identity of a scheduler instance.
///
/// `pool` distinguishes independent pools; `key` is the small per-pool slot
/// (1..=31). Two instances never share both halves while alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct InstanceKey {
    pool: u32,
    key: u8,
}

/// Opaque handle to a scheduled coroutine.
///
/// Stable across slot moves and compaction. A handle whose coroutine has
/// finished or been killed never resolves again: the arena generation is
/// bumped on release.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CoroutineHandle {
    instance: InstanceKey,
    index: Index,
}

/// Synthetic key used by `lock_coroutine` / `unlock_coroutine`.
///
/// Lock keys are never scheduled; they only name a wait-graph entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LockKey(u64);

/// Storage cell of a coroutine: segment plus slot offset.
///
/// Not stable across compaction; re-resolve through the handle registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ProcessIndex {
    pub segment: Segment,
    pub slot: usize,
}

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);
static LOCK_KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocator for instance keys.
///
/// Each `Timing` created through a pool holds one of its 31 keys until it is
/// dropped. Cloning the pool shares the same key space.
#[derive(Clone, Debug)]
pub struct InstancePool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    id: u32,
    active: AtomicU32,
}

impl InstancePool {
    pub fn new() -> Self {
        InstancePool {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                active: AtomicU32::new(0),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Number of instances currently holding a key from this pool.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire).count_ones() as usize
    }

    pub(crate) fn acquire(&self) -> Result<InstanceKey, TimingError> {
        let mut active = self.inner.active.load(Ordering::Acquire);
        loop {
            let Some(key) = (1..=MAX_INSTANCES).find(|key| active & (1u32 << key) == 0) else {
                return Err(TimingError::TooManyInstances { max: MAX_INSTANCES });
            };
            match self.inner.active.compare_exchange_weak(
                active,
                active | (1u32 << key),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(InstanceKey {
                        pool: self.inner.id,
                        key,
                    })
                }
                Err(current) => active = current,
            }
        }
    }

    pub(crate) fn release(&self, instance: InstanceKey) {
        if instance.pool != self.inner.id {
            return;
        }
        self.inner
            .active
            .fetch_and(!(1u32 << instance.key), Ordering::AcqRel);
    }
}

impl Default for InstancePool {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceKey {
    pub fn pool(self) -> u32 {
        self.pool
    }

    pub fn key(self) -> u8 {
        self.key
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pool, self.key)
    }
}

impl CoroutineHandle {
    pub(crate) fn new(instance: InstanceKey, index: Index) -> Self {
        CoroutineHandle { instance, index }
    }

    /// Scheduler instance that issued this handle.
    pub fn instance(self) -> InstanceKey {
        self.instance
    }

    pub(crate) fn index(self) -> Index {
        self.index
    }
}

impl fmt::Display for CoroutineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.index.into_raw_parts();
        write!(f, "{}#{}v{}", self.instance, slot, generation)
    }
}

impl LockKey {
    /// Create a fresh unique lock key.
    pub fn fresh() -> Self {
        LockKey(LOCK_KEY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl ProcessIndex {
    pub fn new(segment: Segment, slot: usize) -> Self {
        ProcessIndex { segment, slot }
    }
}

impl fmt::Display for ProcessIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.segment, self.slot)
    }
}
