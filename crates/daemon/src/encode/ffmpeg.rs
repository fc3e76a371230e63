//! FFmpeg audio encoder for the compression queue
//!
//! Builds and runs the FFmpeg command for one compression request, enforcing
//! a timeout and cleaning up partial output on failure.

use crate::config::FfmpegConfig;
use crate::executor::{CompressionExecutor, CompressionOutput, CompressionRequest, ExecutorError};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a running encoder is checked for exit.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Codec and file extension for an output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub codec: &'static str,
    pub ext: &'static str,
    /// Lossless formats ignore the bitrate.
    pub lossless: bool,
}

/// Look up the codec for a format tag (case-insensitive).
pub fn format_info(format: &str) -> Option<FormatInfo> {
    let info = match format.to_lowercase().as_str() {
        "mp3" => FormatInfo { codec: "libmp3lame", ext: ".mp3", lossless: false },
        "aac" => FormatInfo { codec: "aac", ext: ".m4a", lossless: false },
        "ogg" => FormatInfo { codec: "libvorbis", ext: ".ogg", lossless: false },
        "opus" => FormatInfo { codec: "libopus", ext: ".opus", lossless: false },
        "flac" => FormatInfo { codec: "flac", ext: ".flac", lossless: true },
        _ => return None,
    };
    Some(info)
}

/// Parameters for one FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegParams {
    pub binary: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub bitrate_kbps: u32,
    pub filter_chain: Option<String>,
    pub channels: u32,
    pub sample_rate: u32,
    pub preserve_metadata: bool,
    pub format: FormatInfo,
}

/// Build the FFmpeg command line.
///
/// `ffmpeg -i IN [-map_metadata 0] [-af CHAIN] -ac N -ar RATE [-b:a Nk] -c:a CODEC OUT -y`
pub fn build_ffmpeg_command(params: &FfmpegParams) -> Command {
    let mut cmd = Command::new(&params.binary);

    cmd.arg("-hide_banner").arg("-nostdin");
    cmd.arg("-loglevel").arg("error");

    cmd.arg("-i").arg(&params.input_path);

    if params.preserve_metadata {
        cmd.arg("-map_metadata").arg("0");
    }

    if let Some(chain) = params.filter_chain.as_deref().filter(|c| !c.trim().is_empty()) {
        cmd.arg("-af").arg(chain);
    }

    cmd.arg("-ac").arg(params.channels.to_string());
    cmd.arg("-ar").arg(params.sample_rate.to_string());

    if !params.format.lossless {
        cmd.arg("-b:a").arg(format!("{}k", params.bitrate_kbps));
    }

    cmd.arg("-c:a").arg(params.format.codec);
    cmd.arg(&params.output_path);
    cmd.arg("-y");

    cmd
}

/// Executor that shells out to FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegExecutor {
    binary: String,
    sample_rate: u32,
    timeout: Duration,
    max_input_bytes: u64,
}

impl FfmpegExecutor {
    pub fn new(cfg: &FfmpegConfig) -> Self {
        Self {
            binary: cfg.binary.clone(),
            sample_rate: cfg.sample_rate,
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_input_bytes: cfg.max_input_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Resolve request into FFmpeg parameters, checking the input and preparing
    /// the output directory.
    pub fn prepare(&self, request: &CompressionRequest) -> Result<FfmpegParams, ExecutorError> {
        let metadata = fs::metadata(&request.input_path).map_err(|e| {
            ExecutorError::InvalidInput(format!(
                "cannot read {}: {}",
                request.input_path.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(ExecutorError::InvalidInput(format!(
                "{} is not a file",
                request.input_path.display()
            )));
        }
        if metadata.len() > self.max_input_bytes {
            return Err(ExecutorError::InvalidInput(format!(
                "{} is {} bytes, limit is {}",
                request.input_path.display(),
                metadata.len(),
                self.max_input_bytes
            )));
        }

        let format = format_info(&request.format)
            .ok_or_else(|| ExecutorError::UnsupportedFormat(request.format.clone()))?;

        if let Some(dir) = request.output_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        Ok(FfmpegParams {
            binary: self.binary.clone(),
            input_path: request.input_path.clone(),
            output_path: request.output_path.clone(),
            bitrate_kbps: request.bitrate,
            filter_chain: request.filter_chain.clone(),
            channels: request.channels,
            sample_rate: self.sample_rate,
            preserve_metadata: request.preserve_metadata,
            format,
        })
    }

    fn run(&self, params: &FfmpegParams) -> Result<CompressionOutput, ExecutorError> {
        let mut cmd = build_ffmpeg_command(params);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(input = %params.input_path.display(), output = %params.output_path.display(), "spawning ffmpeg");
        let started = Instant::now();
        let mut child = cmd.spawn()?;

        // Drain stderr on the side so a chatty encoder cannot block on a full pipe
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!(input = %params.input_path.display(), "ffmpeg timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutorError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(WAIT_POLL);
        };

        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(match status.code() {
                Some(code) => ExecutorError::Failed {
                    code,
                    stderr: stderr.trim().to_string(),
                },
                None => ExecutorError::Terminated,
            });
        }

        let output_size = fs::metadata(&params.output_path).map(|m| m.len()).unwrap_or(0);
        if output_size == 0 {
            return Err(ExecutorError::EmptyOutput(params.output_path.clone()));
        }
        let input_size = fs::metadata(&params.input_path)?.len();

        info!(
            input = %params.input_path.display(),
            output = %params.output_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compressed"
        );
        Ok(CompressionOutput::succeeded(input_size, output_size))
    }
}

impl CompressionExecutor for FfmpegExecutor {
    fn compress(&self, request: &CompressionRequest) -> Result<CompressionOutput, ExecutorError> {
        let params = self.prepare(request)?;
        let result = self.run(&params);
        if result.is_err() {
            remove_partial_output(&params.output_path);
        }
        result
    }
}

fn remove_partial_output(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove partial output");
        }
    }
}
