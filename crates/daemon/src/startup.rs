//! Startup checks
//!
//! Preflight checks run before workers are started:
//! - FFmpeg binary is runnable
//! - FFmpeg version is reported (an unrecognised banner is only logged)

use crate::config::Config;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),
}

/// Extract the major version from `ffmpeg -version` output.
///
/// Accepts release banners ("ffmpeg version 6.1.1") and git builds
/// ("ffmpeg version n7.0-12-gabcdef").
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    const MARKER: &str = "ffmpeg version";

    let line = version_output
        .lines()
        .map(str::to_lowercase)
        .find(|l| l.contains(MARKER))?;
    let token = line.split(MARKER).nth(1)?.split_whitespace().next()?;

    let digits: String = token
        .trim_start_matches('n')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Run `<binary> -version` and return the parsed major version, if any.
pub fn check_ffmpeg_available(binary: &str) -> Result<Option<u32>, StartupError> {
    let output = Command::new(binary)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is FFmpeg installed and in PATH? Error: {}",
                binary, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            binary, output.status
        )));
    }

    Ok(parse_ffmpeg_version(&String::from_utf8_lossy(&output.stdout)))
}

/// Run all startup checks for the configured encoder.
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    match check_ffmpeg_available(&cfg.ffmpeg.binary)? {
        Some(major) => info!(binary = %cfg.ffmpeg.binary, major, "found ffmpeg"),
        None => warn!(binary = %cfg.ffmpeg.binary, "could not parse ffmpeg version banner"),
    }
    Ok(())
}
