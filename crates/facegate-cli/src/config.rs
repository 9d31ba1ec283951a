use std::path::{Path, PathBuf};

use facegate_config::ResolvedConfig;
use facegate_core::{
    CameraConfig, DeviceLocator, EnvStoreDirResolver, SessionSettings, StoreDirResolver,
    Threshold, VerificationScorer,
};
use tracing::info;

use crate::cli::CameraArgs;
use crate::errors::AppResult;

pub fn load_runtime_config() -> AppResult<ResolvedConfig> {
    let loaded = facegate_config::load_resolved_config()?;
    match &loaded.source {
        Some(path) => info!(target: "config", path = %path.display(), "loaded configuration"),
        None => info!(target: "config", "no configuration file found; using defaults"),
    }
    Ok(loaded.resolved)
}

/// CLI threshold wins over the configured default.
pub fn resolve_threshold(config: &ResolvedConfig, cli_value: Option<u8>) -> AppResult<Threshold> {
    Ok(Threshold::new(cli_value.unwrap_or(config.default_threshold))?)
}

pub fn session_settings(
    config: &ResolvedConfig,
    threshold_override: Option<u8>,
) -> AppResult<SessionSettings> {
    Ok(SessionSettings {
        refresh_interval: config.refresh_interval,
        tick_timeout: config.tick_timeout,
        scorer: VerificationScorer::new(config.score_scale)?,
        threshold: resolve_threshold(config, threshold_override)?,
    })
}

pub fn camera_config(config: &ResolvedConfig, args: &CameraArgs) -> CameraConfig {
    let device = args
        .device
        .clone()
        .unwrap_or_else(|| config.video_device.clone());
    CameraConfig {
        device: DeviceLocator::from_option(Some(device)),
        pixel_format: args
            .pixel_format
            .clone()
            .unwrap_or_else(|| config.pixel_format.clone()),
        width: None,
        height: None,
        warmup_frames: args.warmup_frames.unwrap_or(config.warmup_frames),
    }
}

pub fn store_dir(config: &ResolvedConfig, cli_value: Option<&Path>) -> PathBuf {
    let override_dir = cli_value.or(config.enrollment_store_dir.as_deref());
    EnvStoreDirResolver.resolve(override_dir)
}
