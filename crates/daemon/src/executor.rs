//! Compression executor contract.
//!
//! The queue treats compression as an opaque, synchronous, possibly slow and
//! possibly failing call. Workers run it on the blocking thread pool.

use crate::jobs::CompressionJob;
use std::path::PathBuf;
use thiserror::Error;

/// Errors an executor can return for one attempt.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Input is missing, unreadable or too large.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No codec is known for the requested format.
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Encoder exited with non-zero status.
    #[error("Encoder failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// Encoder was terminated by a signal.
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// Encoder ran past its deadline and was killed.
    #[error("Encoder timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Encoder reported success but produced no usable output.
    #[error("Output file missing or empty: {0}")]
    EmptyOutput(PathBuf),

    /// The executor panicked.
    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the executor needs to run one compression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Target bitrate in kbps.
    pub bitrate: u32,
    pub filter_chain: Option<String>,
    pub format: String,
    pub channels: u32,
    pub preserve_metadata: bool,
}

impl From<&CompressionJob> for CompressionRequest {
    fn from(job: &CompressionJob) -> Self {
        Self {
            input_path: PathBuf::from(&job.input_path),
            output_path: PathBuf::from(&job.output_path),
            bitrate: job.bitrate,
            filter_chain: job.filter_chain.clone(),
            format: job.format.clone(),
            channels: job.channels,
            preserve_metadata: job.preserve_metadata,
        }
    }
}

/// Outcome of one attempt: the success flag and the byte sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOutput {
    pub success: bool,
    pub input_size: u64,
    pub output_size: u64,
}

impl CompressionOutput {
    pub fn succeeded(input_size: u64, output_size: u64) -> Self {
        Self {
            success: true,
            input_size,
            output_size,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            input_size: 0,
            output_size: 0,
        }
    }
}

/// Performs one compression.
///
/// Implementations must be safe to call repeatedly for the same request and
/// are responsible for cleaning up partial output and bounding their own
/// runtime.
pub trait CompressionExecutor: Send + Sync + 'static {
    fn compress(&self, request: &CompressionRequest) -> Result<CompressionOutput, ExecutorError>;
}

impl<F> CompressionExecutor for F
where
    F: Fn(&CompressionRequest) -> Result<CompressionOutput, ExecutorError> + Send + Sync + 'static,
{
    fn compress(&self, request: &CompressionRequest) -> Result<CompressionOutput, ExecutorError> {
        self(request)
    }
}
