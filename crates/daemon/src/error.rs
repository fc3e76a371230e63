//! Error type for queue operations.

use crate::store::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Submission refused by the rate limiter. Retry later.
    #[error("Rate limit exceeded: at most {limit} submissions per {window_secs}s")]
    RateLimitExceeded { limit: u32, window_secs: u64 },

    /// The job was rejected before entering the table.
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// A job with this id is being compressed and cannot be replaced.
    #[error("Job {0} is running and cannot be resubmitted")]
    AlreadyRunning(String),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),
}

pub type Result<T> = std::result::Result<T, QueueError>;
