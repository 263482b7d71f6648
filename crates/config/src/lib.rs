//! Configuration module for the e-paper photo frame
//!
//! Handles loading frame configuration from TOML files with environment variable
//! overrides, and reading the per-volume refresh interval.

pub mod config;
pub mod refresh;

pub use config::*;
pub use refresh::{parse_refresh_time, RefreshConfig, DEFAULT_REFRESH_SECS, REFRESH_FILE_NAME};
