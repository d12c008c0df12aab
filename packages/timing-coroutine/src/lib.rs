//! timing-coroutine: segmented cooperative coroutine scheduler for a host frame loop.
//!
//! Coroutines are resumable bodies that yield a resume time after every
//! step. The host drives them from its frame callbacks, one pass per
//! segment per frame.
//!
//! # Architecture
//!
//! - **Segment tables**: one growable slot table per host phase (`Update`,
//!   `FixedUpdate`, `LateUpdate`, `SlowUpdate`)
//! - **Handle registry**: generational handles that survive compaction
//! - **Tag index**: bulk kill/pause/resume by string tag
//! - **Wait graph**: coroutine-on-coroutine waits and lock keys
//! - **Driver**: single-threaded passes with in-place body replacement

pub mod config;
pub mod coroutine;
pub mod error;
mod helpers;
pub mod ids;
mod logging;
pub mod registry;
pub mod segment;
pub mod step;
pub mod tags;
pub mod timing;
pub mod wait_graph;

// Re-exports for convenience
pub use config::{CapacityConfig, TimingConfig};
pub use coroutine::{from_fn, CancelWith, CoroutineExt, FnCoroutine, PollUntil};
pub use error::{BoxError, StepError, TimingError};
pub use helpers::Repeat;
pub use ids::{CoroutineHandle, InstanceKey, InstancePool, LockKey, ProcessIndex, MAX_INSTANCES};
pub use segment::Segment;
pub use step::{BoxedCoroutine, Context, Coroutine, Replacement, Step};
pub use timing::{FrameTime, Timing};
pub use wait_graph::WaitTarget;
