//! Audio compression job queue
//!
//! Persistent, rate-limited priority queue that runs audio compression jobs on
//! a pool of workers, with an FFmpeg executor, batch submission and an optional
//! status HTTP server.

pub mod batch;
pub mod concurrency;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod queue;
pub mod rate_limit;
pub mod startup;
pub mod status_server;
pub mod store;
mod worker;

pub use audio_queue_config as config;
pub use audio_queue_config::Config;
pub use batch::{
    is_audio_file, list_audio_files, plan_batch, submit_batch, BatchError, BatchReport,
    BatchRequest, AUDIO_EXTENSIONS,
};
pub use concurrency::{derive_plan, WorkerPlan};
pub use dispatch::{DispatchEntry, DispatchQueue};
pub use encode::{build_ffmpeg_command, format_info, FfmpegExecutor, FfmpegParams, FormatInfo};
pub use error::{QueueError, Result};
pub use events::{EventHub, JobCallback, JobEvent, JobEventKind, UnknownEvent};
pub use executor::{CompressionExecutor, CompressionOutput, CompressionRequest, ExecutorError};
pub use jobs::{CompressionJob, InvalidPriority, JobPriority, JobStatus};
pub use queue::{JobQueue, QueueSettings, QueueStats};
pub use rate_limit::RateLimiter;
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use status_server::{create_status_router, run_status_server, CancelResponse, ServerError};
pub use store::{JobStore, JobTable, PersistError};
