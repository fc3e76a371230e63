//! Job lifecycle events.
//!
//! Two ways to observe the queue: one callback slot per event name
//! (re-registering replaces the previous callback), and a broadcast channel
//! any number of subscribers can listen on. A panicking callback is logged and
//! never reaches the worker that fired it.

use crate::jobs::CompressionJob;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::error;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Started => "job_started",
            JobEventKind::Completed => "job_completed",
            JobEventKind::Failed => "job_failed",
            JobEventKind::Cancelled => "job_cancelled",
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl std::str::FromStr for JobEventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job_started" => Ok(JobEventKind::Started),
            "job_completed" => Ok(JobEventKind::Completed),
            "job_failed" => Ok(JobEventKind::Failed),
            "job_cancelled" => Ok(JobEventKind::Cancelled),
            other => Err(UnknownEvent(other.to_string())),
        }
    }
}

/// An event with a snapshot of the record at the time it fired.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: CompressionJob,
}

pub type JobCallback = Arc<dyn Fn(&CompressionJob) + Send + Sync>;

/// Callback registry plus broadcast fan-out.
pub struct EventHub {
    callbacks: Mutex<HashMap<JobEventKind, JobCallback>>,
    sender: broadcast::Sender<JobEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            callbacks: Mutex::new(HashMap::new()),
            sender,
        }
    }

    /// Install the callback for `kind`. Returns true if one was replaced.
    pub fn register<F>(&self, kind: JobEventKind, callback: F) -> bool
    where
        F: Fn(&CompressionJob) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(callback))
            .is_some()
    }

    pub fn unregister(&self, kind: JobEventKind) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
            .is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Run the callback for `kind` (if any) and broadcast the event.
    ///
    /// The registry lock is not held while the callback runs.
    pub fn emit(&self, kind: JobEventKind, job: &CompressionJob) {
        let callback = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();

        if let Some(callback) = callback {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(job))) {
                error!(
                    event = %kind,
                    job_id = %job.job_id,
                    panic = %panic_message(&panic),
                    "callback panicked"
                );
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(JobEvent {
            kind,
            job: job.clone(),
        });
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
