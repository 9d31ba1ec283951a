use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";
pub const DEFAULT_THRESHOLD: u8 = 50;
pub const MIN_THRESHOLD: u8 = 20;
pub const MAX_THRESHOLD: u8 = 100;
pub const DEFAULT_SCORE_SCALE: f64 = 1.0;
pub const DEFAULT_REFRESH_INTERVAL_MILLIS: u64 = 33;
pub const DEFAULT_TICK_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_DISPLAY_MAX_DIMENSION: u32 = 1270;
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";
pub const DEFAULT_PIXEL_FORMAT: &str = "YUYV";
pub const DEFAULT_WARMUP_FRAMES: u32 = 2;
pub const DEFAULT_JITTERS: u32 = 1;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub default_threshold: Option<u8>,
    pub score_scale: Option<f64>,
    pub refresh_interval_millis: Option<u64>,
    pub tick_timeout_millis: Option<u64>,
    pub display_max_dimension: Option<u32>,
    pub enrollment_store_dir: Option<PathBuf>,
    pub video_device: Option<String>,
    pub pixel_format: Option<String>,
    pub warmup_frames: Option<u32>,
    pub jitters: Option<u32>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub default_threshold: u8,
    pub score_scale: f64,
    pub refresh_interval: Duration,
    pub tick_timeout: Duration,
    pub display_max_dimension: u32,
    /// `None` defers to the store's own resolution (environment, then default).
    pub enrollment_store_dir: Option<PathBuf>,
    pub video_device: String,
    pub pixel_format: String,
    pub warmup_frames: u32,
    pub jitters: u32,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            default_threshold: raw.default_threshold.unwrap_or(DEFAULT_THRESHOLD),
            score_scale: raw.score_scale.unwrap_or(DEFAULT_SCORE_SCALE),
            refresh_interval: Duration::from_millis(
                raw.refresh_interval_millis
                    .unwrap_or(DEFAULT_REFRESH_INTERVAL_MILLIS),
            ),
            tick_timeout: Duration::from_millis(
                raw.tick_timeout_millis
                    .unwrap_or(DEFAULT_TICK_TIMEOUT_MILLIS)
                    .max(1),
            ),
            display_max_dimension: raw
                .display_max_dimension
                .unwrap_or(DEFAULT_DISPLAY_MAX_DIMENSION),
            enrollment_store_dir: raw.enrollment_store_dir,
            video_device: raw
                .video_device
                .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
            pixel_format: raw
                .pixel_format
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            warmup_frames: raw.warmup_frames.unwrap_or(DEFAULT_WARMUP_FRAMES),
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
        }
    }

    /// Range checks that the TOML types alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.default_threshold) {
            return Err(format!(
                "default_threshold must be within {MIN_THRESHOLD}..={MAX_THRESHOLD}, got {}",
                self.default_threshold
            ));
        }
        if !(self.score_scale.is_finite() && self.score_scale > 0.0) {
            return Err(format!(
                "score_scale must be a positive number, got {}",
                self.score_scale
            ));
        }
        if self.display_max_dimension == 0 {
            return Err("display_max_dimension must be greater than zero".into());
        }
        Ok(())
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration in {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

fn default_sources() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_config() -> Result<Option<LoadedConfig>, ConfigError> {
    load_from_paths(&default_sources())
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_sources())
}

/// Returns the first config file that exists; later paths are only fallbacks.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig {
                    contents: parsed,
                    source: path.clone(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => {
            let resolved = ResolvedConfig::from_raw(entry.contents);
            resolved
                .validate()
                .map_err(|message| ConfigError::Invalid {
                    path: entry.source.clone(),
                    message,
                })?;
            Ok(ResolvedConfigWithSource {
                resolved,
                source: Some(entry.source),
            })
        }
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}
