//! Scheduler error types.

use thiserror::Error;

use hivegrid_core::{JobKind, UnknownJobKind};
use hivegrid_registry::NodeError;

/// Errors from submitting, executing, or managing jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    UnknownJobKind(#[from] UnknownJobKind),

    #[error("{kind} job is missing payload field `{field}`")]
    MissingField { kind: JobKind, field: &'static str },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("node call failed: {0}")]
    Node(#[from] NodeError),

    #[error("job execution aborted: {0}")]
    Aborted(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {id} cannot be resubmitted: {reason}")]
    NotRetryable { id: String, reason: String },

    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("dispatcher is not running")]
    NotRunning,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
