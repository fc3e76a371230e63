//! Configuration module for the audio compression queue
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
