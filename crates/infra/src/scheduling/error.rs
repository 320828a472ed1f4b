//! Error surface for the sync scheduler lifecycle.

use dealflow_domain::DealflowError;
use thiserror::Error;

use crate::errors::InfraError;

/// Failures raised by the scheduler lifecycle and its trigger queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called while the loop is already active.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// A lifecycle call or trigger arrived with no loop active.
    #[error("scheduler is not running")]
    NotRunning,

    /// The loop did not exit within the shutdown grace period.
    #[error("scheduler did not stop within {seconds}s")]
    Timeout { seconds: u64 },

    /// The loop task panicked or was aborted.
    #[error("scheduler task failed to join: {0}")]
    TaskJoinFailed(String),

    /// An on-demand trigger could not be enqueued.
    #[error("sync trigger rejected: {0}")]
    TriggerFailed(String),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let mapped = match &err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                DealflowError::InvalidInput(err.to_string())
            }
            SchedulerError::Timeout { .. }
            | SchedulerError::TaskJoinFailed(_)
            | SchedulerError::TriggerFailed(_) => DealflowError::Internal(err.to_string()),
        };
        Self(mapped)
    }
}

impl From<SchedulerError> for DealflowError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
