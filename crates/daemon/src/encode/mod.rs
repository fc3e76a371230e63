//! Encoder backends for the compression queue

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, format_info, FfmpegExecutor, FfmpegParams, FormatInfo};
