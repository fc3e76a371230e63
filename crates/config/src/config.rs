//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// What to do with records found in `running` state when the job file is loaded.
///
/// A record can only be `running` at load time if the previous process died
/// mid-compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Leave the record in `running` until it is reconciled by hand.
    #[default]
    Leave,
    /// Reset the record to `pending` and dispatch it again.
    Requeue,
}

impl RecoveryPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "leave" => Some(RecoveryPolicy::Leave),
            "requeue" => Some(RecoveryPolicy::Requeue),
            _ => None,
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Number of workers (0 = derive from core count)
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Path of the JSON job table snapshot
    #[serde(default = "default_persist_file")]
    pub persist_file: PathBuf,
    /// Maximum submissions accepted per rate window
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    /// Length of the sliding rate window in seconds (0 is treated as 1)
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    /// Additional executor attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between executor attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long an idle worker waits on the dispatch queue before re-checking for stop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on joining each worker during stop
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Handling of records stuck in `running` at load time
    #[serde(default)]
    pub recover_running: RecoveryPolicy,
}

fn default_workers() -> u32 {
    4
}

fn default_persist_file() -> PathBuf {
    PathBuf::from("job_queue.json")
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            persist_file: default_persist_file(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            rate_window_secs: default_rate_window_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            recover_running: RecoveryPolicy::default(),
        }
    }
}

/// FFmpeg invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FfmpegConfig {
    /// FFmpeg binary name or path
    #[serde(default = "default_ffmpeg_binary")]
    pub binary: String,
    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Per-invocation timeout in seconds
    #[serde(default = "default_ffmpeg_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs larger than this are rejected
    #[serde(default = "default_max_input_mb")]
    pub max_input_mb: u64,
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_ffmpeg_timeout_secs() -> u64 {
    300
}

fn default_max_input_mb() -> u64 {
    500
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: default_ffmpeg_binary(),
            sample_rate: default_sample_rate(),
            timeout_secs: default_ffmpeg_timeout_secs(),
            max_input_mb: default_max_input_mb(),
        }
    }
}

/// Status HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - AUDIOQ_WORKERS -> queue.workers
    /// - AUDIOQ_PERSIST_FILE -> queue.persist_file
    /// - AUDIOQ_RATE_LIMIT -> queue.rate_limit_per_minute
    /// - AUDIOQ_MAX_RETRIES -> queue.max_retries
    /// - AUDIOQ_RECOVER_RUNNING -> queue.recover_running
    /// - FFMPEG_BINARY -> ffmpeg.binary
    /// - FFMPEG_TIMEOUT_SECS -> ffmpeg.timeout_secs
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("AUDIOQ_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.queue.workers = workers;
            }
        }

        if let Ok(val) = env::var("AUDIOQ_PERSIST_FILE") {
            if !val.trim().is_empty() {
                self.queue.persist_file = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("AUDIOQ_RATE_LIMIT") {
            if let Ok(limit) = val.parse::<u32>() {
                self.queue.rate_limit_per_minute = limit;
            }
        }

        if let Ok(val) = env::var("AUDIOQ_MAX_RETRIES") {
            if let Ok(retries) = val.parse::<u32>() {
                self.queue.max_retries = retries;
            }
        }

        if let Ok(val) = env::var("AUDIOQ_RECOVER_RUNNING") {
            if let Some(policy) = RecoveryPolicy::parse(&val) {
                self.queue.recover_running = policy;
            }
        }

        if let Ok(val) = env::var("FFMPEG_BINARY") {
            if !val.trim().is_empty() {
                self.ffmpeg.binary = val;
            }
        }

        if let Ok(val) = env::var("FFMPEG_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.ffmpeg.timeout_secs = secs;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
