//! Batch submission
//!
//! Lists the audio files in a directory and submits one job per
//! (file, bitrate) pair. Submissions go through the normal rate limiter, so a
//! large batch can be partially rejected.

use crate::encode::format_info;
use crate::error::QueueError;
use crate::jobs::{CompressionJob, JobPriority};
use crate::queue::JobQueue;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Input extensions picked up by a batch (case-insensitive).
pub const AUDIO_EXTENSIONS: &[&str] = &[".wav", ".mp3", ".m4a", ".flac", ".aac", ".ogg", ".opus"];

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Input directory not found: {0}")]
    MissingInputDir(PathBuf),

    #[error("No bitrates given")]
    NoBitrates,

    #[error("Failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A directory-wide compression request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// One job is created per bitrate for every input file.
    pub bitrates: Vec<u32>,
    pub format: String,
    pub priority: JobPriority,
    pub channels: u32,
    pub filter_chain: Option<String>,
    pub preserve_metadata: bool,
    /// Prepended to job ids and recorded as the preset name.
    pub prefix: Option<String>,
}

impl BatchRequest {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        bitrates: Vec<u32>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            bitrates,
            format: format.into(),
            priority: JobPriority::Normal,
            channels: 1,
            filter_chain: None,
            preserve_metadata: true,
            prefix: None,
        }
    }
}

/// Outcome of a batch: ids that were queued and ids that were refused.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<(String, QueueError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Check if a file has a supported audio extension (case-insensitive).
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            AUDIO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Audio files directly inside `dir`, sorted by name. Subdirectories are not entered.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::MissingInputDir(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| BatchError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && is_audio_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Build the job records for a batch without submitting them.
pub fn plan_batch(request: &BatchRequest) -> Result<Vec<CompressionJob>, BatchError> {
    if request.bitrates.is_empty() {
        return Err(BatchError::NoBitrates);
    }

    let ext = format_info(&request.format)
        .map(|f| f.ext.to_string())
        .unwrap_or_else(|| format!(".{}", request.format.to_lowercase()));

    let mut jobs = Vec::new();
    for input in list_audio_files(&request.input_dir)? {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for &bitrate in &request.bitrates {
            let output = request
                .output_dir
                .join(format!("optimised-{}kbps", bitrate))
                .join(format!("{}{}", stem, ext));
            let job_id = match &request.prefix {
                Some(prefix) => format!("{}_{}_{}", prefix, stem, bitrate),
                None => format!("{}_{}", stem, bitrate),
            };

            let mut job = CompressionJob::new(
                job_id,
                input.to_string_lossy(),
                output.to_string_lossy(),
                bitrate,
                request.format.clone(),
            )
            .with_priority(request.priority)
            .with_channels(request.channels)
            .with_preserve_metadata(request.preserve_metadata);
            if let Some(chain) = &request.filter_chain {
                job = job.with_filter_chain(chain.clone());
            }
            if let Some(prefix) = &request.prefix {
                job = job.with_preset(prefix.clone());
            }
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// Submit every job of a batch, collecting refusals instead of stopping at the first.
pub fn submit_batch(queue: &JobQueue, request: &BatchRequest) -> Result<BatchReport, BatchError> {
    let mut report = BatchReport::default();

    for job in plan_batch(request)? {
        let job_id = job.job_id.clone();
        match queue.submit(job) {
            Ok(id) => report.accepted.push(id),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "batch job refused");
                report.rejected.push((job_id, e));
            }
        }
    }

    info!(
        input_dir = %request.input_dir.display(),
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        "submitted batch"
    );
    Ok(report)
}
