//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file the worker should load.
pub const CONFIG_PATH_ENV: &str = "FRAME_CONFIG";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
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

/// Counter-clockwise rotation applied to every frame before it reaches the panel.
///
/// Stored in TOML as plain degrees; only right angles are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!(
                "rotation must be one of 0, 90, 180, 270 (got {})",
                other
            )),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// Storage monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Directory whose subdirectories are removable volumes (derived from the user if None)
    pub mount_root: Option<PathBuf>,
    /// Worker executable (sibling `frame-worker` of the monitor if None)
    pub worker_binary: Option<PathBuf>,
    /// Remove inaccessible mount directories before polling (default true)
    #[serde(default = "default_cleanup_stale_mounts")]
    pub cleanup_stale_mounts: bool,
}

fn default_cleanup_stale_mounts() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mount_root: None,
            worker_binary: None,
            cleanup_stale_mounts: default_cleanup_stale_mounts(),
        }
    }
}

/// Panel geometry and render configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelConfig {
    /// Panel width in pixels (default 800)
    #[serde(default = "default_panel_width")]
    pub width: u32,
    /// Panel height in pixels (default 480)
    #[serde(default = "default_panel_height")]
    pub height: u32,
    /// Rotation applied at render time (default 0)
    #[serde(default)]
    pub rotation: Rotation,
    /// Where the headless panel writes its PNG preview
    #[serde(default = "default_preview_path")]
    pub preview_path: PathBuf,
}

fn default_panel_width() -> u32 {
    800
}

fn default_panel_height() -> u32 {
    480
}

fn default_preview_path() -> PathBuf {
    PathBuf::from("/var/lib/epaper-frame/frame.png")
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            width: default_panel_width(),
            height: default_panel_height(),
            rotation: Rotation::default(),
            preview_path: default_preview_path(),
        }
    }
}

/// Local directories owned by the worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Converted images for the current run; wiped at every worker start
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    /// Fallback message images (start.jpg, no_valid_images.jpg)
    #[serde(default = "default_messages_dir")]
    pub messages_dir: PathBuf,
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("/var/lib/epaper-frame/pic")
}

fn default_messages_dir() -> PathBuf {
    PathBuf::from("/usr/share/epaper-frame/messages")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            processed_dir: default_processed_dir(),
            messages_dir: default_messages_dir(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FrameConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl FrameConfig {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FrameConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot drive a panel
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panel.width == 0 || self.panel.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "panel dimensions must be non-zero (got {}x{})",
                self.panel.width, self.panel.height
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - FRAME_MOUNT_ROOT -> monitor.mount_root
    /// - FRAME_WORKER_BINARY -> monitor.worker_binary
    /// - FRAME_CLEANUP_STALE_MOUNTS -> monitor.cleanup_stale_mounts
    /// - FRAME_PANEL_ROTATION -> panel.rotation
    /// - FRAME_PREVIEW_PATH -> panel.preview_path
    /// - FRAME_PROCESSED_DIR -> paths.processed_dir
    /// - FRAME_MESSAGES_DIR -> paths.messages_dir
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = non_empty_env("FRAME_MOUNT_ROOT") {
            self.monitor.mount_root = Some(PathBuf::from(path));
        }

        if let Some(path) = non_empty_env("FRAME_WORKER_BINARY") {
            self.monitor.worker_binary = Some(PathBuf::from(path));
        }

        if let Ok(val) = env::var("FRAME_CLEANUP_STALE_MOUNTS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.monitor.cleanup_stale_mounts = true,
                "false" | "0" | "no" => self.monitor.cleanup_stale_mounts = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("FRAME_PANEL_ROTATION") {
            if let Some(rotation) = val
                .trim()
                .parse::<u16>()
                .ok()
                .and_then(|deg| Rotation::try_from(deg).ok())
            {
                self.panel.rotation = rotation;
            }
        }

        if let Some(path) = non_empty_env("FRAME_PREVIEW_PATH") {
            self.panel.preview_path = PathBuf::from(path);
        }

        if let Some(path) = non_empty_env("FRAME_PROCESSED_DIR") {
            self.paths.processed_dir = PathBuf::from(path);
        }

        if let Some(path) = non_empty_env("FRAME_MESSAGES_DIR") {
            self.paths.messages_dir = PathBuf::from(path);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// The mount root to watch
    ///
    /// Falls back to `/media/<user>`, where the user is taken from `SUDO_USER`,
    /// then `USER`, then `pi`.
    pub fn resolved_mount_root(&self) -> PathBuf {
        if let Some(root) = &self.monitor.mount_root {
            return root.clone();
        }
        let user = non_empty_env("SUDO_USER")
            .or_else(|| non_empty_env("USER"))
            .unwrap_or_else(|| "pi".to_string());
        PathBuf::from("/media").join(user)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
