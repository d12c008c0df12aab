//! Error types for the scheduler.

use std::path::PathBuf;

use thiserror::Error;

use crate::ids::CoroutineHandle;
use crate::segment::Segment;

/// Error a coroutine body may fail a step with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("too many scheduler instances: at most {max} may be alive per pool")]
    TooManyInstances { max: u8 },

    #[error(transparent)]
    Coroutine(#[from] StepError),

    #[error("invalid timing config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to read timing config {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A coroutine step that returned an error. The coroutine is already dead
/// by the time this is observed.
#[derive(Debug, Error)]
#[error("coroutine {handle} failed during {segment}: {source}")]
pub struct StepError {
    pub handle: CoroutineHandle,
    pub segment: Segment,
    #[source]
    pub source: BoxError,
}

impl TimingError {
    pub fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TimingError::ConfigIo {
            path: path.into(),
            source,
        }
    }

    /// The failed step, if this error reports one.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            TimingError::Coroutine(err) => Some(err),
            _ => None,
        }
    }
}

impl StepError {
    pub fn new(handle: CoroutineHandle, segment: Segment, source: BoxError) -> Self {
        StepError {
            handle,
            segment,
            source,
        }
    }
}
