//! Per-volume refresh interval
//!
//! A volume may carry a `refresh_time.txt` at its root holding the number of
//! seconds between image changes. Anything missing or malformed falls back to
//! the default; this never fails.

use std::fs;
use std::path::Path;
use tracing::info;

/// File name looked up at the root of a volume.
pub const REFRESH_FILE_NAME: &str = "refresh_time.txt";

/// Interval used when the volume does not provide a usable one.
pub const DEFAULT_REFRESH_SECS: u64 = 600;

/// Redisplay interval resolved for one worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    pub seconds: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            seconds: DEFAULT_REFRESH_SECS,
        }
    }
}

impl RefreshConfig {
    /// Read `refresh_time.txt` from the root of `volume`.
    pub fn read_from_volume(volume: &Path) -> Self {
        let path = volume.join(REFRESH_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "{} not found, defaulting to {} seconds",
                    REFRESH_FILE_NAME, DEFAULT_REFRESH_SECS
                );
                return Self::default();
            }
            Err(e) => {
                info!(
                    error = %e,
                    "Could not read {}, defaulting to {} seconds",
                    REFRESH_FILE_NAME, DEFAULT_REFRESH_SECS
                );
                return Self::default();
            }
        };

        match parse_refresh_time(&content) {
            Some(seconds) => {
                info!("Using refresh time from {}: {} seconds", REFRESH_FILE_NAME, seconds);
                Self { seconds }
            }
            None => {
                info!(
                    "Invalid number in {}, defaulting to {} seconds",
                    REFRESH_FILE_NAME, DEFAULT_REFRESH_SECS
                );
                Self::default()
            }
        }
    }
}

/// Parse the content of a refresh file.
///
/// After trimming whitespace the content must be a non-empty run of ASCII
/// digits that fits in a `u64`. Signs, decimals and units are rejected.
pub fn parse_refresh_time(content: &str) -> Option<u64> {
    let trimmed = content.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
