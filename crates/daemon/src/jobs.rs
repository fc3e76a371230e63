//! Job record module for the compression queue.
//!
//! A [`CompressionJob`] is the persisted description and live status of one
//! compression task. Status changes go through the transition methods on the
//! record so the lifecycle rules hold no matter who drives them:
//!
//! ```text
//! pending -> running -> completed | failed
//! pending -> cancelled
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a worker.
    Pending,
    /// Job is being compressed by a worker.
    Running,
    /// Job completed successfully.
    Completed,
    /// Job failed after exhausting its retries.
    Failed,
    /// Job was cancelled before dispatch.
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Scheduling priority. Higher values are dispatched first.
///
/// Persisted as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Priority value outside 1..=4, or an unknown priority name.
#[derive(Debug, Error)]
#[error("invalid job priority: {0}")]
pub struct InvalidPriority(pub String);

impl From<JobPriority> for u8 {
    fn from(p: JobPriority) -> Self {
        p.value()
    }
}

impl TryFrom<u8> for JobPriority {
    type Error = InvalidPriority;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(JobPriority::Low),
            2 => Ok(JobPriority::Normal),
            3 => Ok(JobPriority::High),
            4 => Ok(JobPriority::Urgent),
            other => Err(InvalidPriority(other.to_string())),
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = InvalidPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" | "1" => Ok(JobPriority::Low),
            "normal" | "2" => Ok(JobPriority::Normal),
            "high" | "3" => Ok(JobPriority::High),
            "urgent" | "4" => Ok(JobPriority::Urgent),
            _ => Err(InvalidPriority(s.to_string())),
        }
    }
}

/// One compression task with full metadata.
///
/// Timestamps are Unix microseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionJob {
    /// Caller-supplied unique key.
    pub job_id: String,
    pub input_path: String,
    pub output_path: String,
    /// Target bitrate in kbps.
    pub bitrate: u32,
    /// Output codec tag (mp3, aac, ogg, opus, flac).
    pub format: String,
    /// FFmpeg audio filter chain, passed through untouched.
    #[serde(default)]
    pub filter_chain: Option<String>,
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_preserve_metadata")]
    pub preserve_metadata: bool,
    #[serde(default)]
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Completion percentage, 0.0 to 100.0.
    #[serde(default)]
    pub progress: f32,
    /// Set if and only if the job failed.
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    /// Input size in bytes, populated on success.
    #[serde(default)]
    pub input_size: u64,
    /// Output size in bytes, populated on success.
    #[serde(default)]
    pub output_size: u64,
    /// Preset the job was generated from, if any.
    #[serde(default)]
    pub preset_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn default_channels() -> u32 {
    1
}

fn default_preserve_metadata() -> bool {
    true
}

impl CompressionJob {
    /// Create a pending job with normal priority, mono output and metadata preserved.
    pub fn new(
        job_id: impl Into<String>,
        input_path: impl Into<String>,
        output_path: impl Into<String>,
        bitrate: u32,
        format: impl Into<String>,
    ) -> Self {
        let now = next_created_at();
        Self {
            job_id: job_id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            bitrate,
            format: format.into(),
            filter_chain: None,
            channels: default_channels(),
            preserve_metadata: default_preserve_metadata(),
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            progress: 0.0,
            error_message: None,
            started_at: None,
            finished_at: None,
            input_size: 0,
            output_size: 0,
            preset_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter_chain(mut self, chain: impl Into<String>) -> Self {
        self.filter_chain = Some(chain.into());
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_preserve_metadata(mut self, preserve: bool) -> Self {
        self.preserve_metadata = preserve;
        self
    }

    pub fn with_preset(mut self, preset_name: impl Into<String>) -> Self {
        self.preset_name = Some(preset_name.into());
        self
    }

    /// Update the job's updated_at timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = current_timestamp_us();
    }

    /// Check the caller-supplied fields before the job enters the table.
    pub fn validate(&self) -> Result<(), String> {
        if self.job_id.trim().is_empty() {
            return Err("job id must not be empty".to_string());
        }
        if self.input_path.trim().is_empty() {
            return Err(format!("job {}: input path must not be empty", self.job_id));
        }
        if self.output_path.trim().is_empty() {
            return Err(format!("job {}: output path must not be empty", self.job_id));
        }
        if self.input_path == self.output_path {
            return Err(format!(
                "job {}: output path must differ from input path",
                self.job_id
            ));
        }
        if self.input_path.contains('\0') || self.output_path.contains('\0') {
            return Err(format!("job {}: paths must not contain NUL", self.job_id));
        }
        if self.bitrate == 0 {
            return Err(format!("job {}: bitrate must be positive", self.job_id));
        }
        if self.channels == 0 {
            return Err(format!("job {}: channels must be at least 1", self.job_id));
        }
        if self.format.trim().is_empty() {
            return Err(format!("job {}: format must not be empty", self.job_id));
        }
        Ok(())
    }

    /// Clear runtime state so a submitted record always enters the table as pending.
    pub(crate) fn reset_for_submit(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0.0;
        self.error_message = None;
        self.started_at = None;
        self.finished_at = None;
        self.input_size = 0;
        self.output_size = 0;
        self.touch();
    }

    /// Pending -> running. Returns false if the job was not pending.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(current_timestamp_us());
        self.progress = 0.0;
        self.touch();
        self.advance_progress(10.0);
        true
    }

    /// Running -> completed with the byte sizes reported by the executor.
    pub fn complete(&mut self, input_size: u64, output_size: u64) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.advance_progress(100.0);
        self.status = JobStatus::Completed;
        self.input_size = input_size;
        self.output_size = output_size;
        self.error_message = None;
        self.finished_at = Some(current_timestamp_us());
        self.touch();
        true
    }

    /// Running -> failed with a reason.
    pub fn fail(&mut self, reason: &str) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.to_string());
        self.finished_at = Some(current_timestamp_us());
        self.touch();
        true
    }

    /// Pending -> cancelled. Any other state is left untouched.
    pub fn cancel(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.touch();
        true
    }

    /// Running -> pending, discarding the interrupted attempt.
    pub(crate) fn requeue(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.progress = 0.0;
        self.touch();
        true
    }

    /// Raise progress while running. Lower values are ignored.
    pub fn advance_progress(&mut self, pct: f32) {
        if self.status != JobStatus::Running {
            return;
        }
        let pct = pct.clamp(0.0, 100.0);
        if pct > self.progress {
            self.progress = pct;
            self.touch();
        }
    }

    /// Check if the job is in a terminal state (completed, failed, or cancelled).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job is active (pending or running).
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Running)
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

static LAST_CREATED_AT: AtomicI64 = AtomicI64::new(0);

/// Creation timestamp that is strictly greater than every one handed out before
/// in this process, so jobs built back to back keep their FIFO order.
pub fn next_created_at() -> i64 {
    let now = current_timestamp_us();
    let prev = LAST_CREATED_AT
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}
