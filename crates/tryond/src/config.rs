use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tryon_core::estimator::{EstimatorOptions, DEFAULT_CONFIDENCE_THRESHOLD};
use tryon_core::smoother::DEFAULT_SMOOTHING_FACTOR;
use tryon_core::types::{Offset, PlacementConfig};
use tryon_hw::{CameraRequest, DeviceMap, FacingMode};

/// Optional TOML overlay. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    environment_camera_device: Option<String>,
    facing_mode: Option<FacingMode>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    detector_threshold: Option<f32>,
    force_fallback: Option<bool>,
    fallback_on_miss: Option<bool>,
    detection_interval_ms: Option<u64>,
    refresh_hz: Option<u32>,
    smoothing_factor: Option<f32>,
    placement: Option<PlacementConfig>,
    system_bus: Option<bool>,
}

/// Daemon configuration: TOML file (if any), then `TRYON_*` environment
/// variables, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device facing the user (default: /dev/video0).
    pub camera_device: String,
    /// V4L2 device facing away from the user, if any.
    pub environment_camera_device: Option<String>,
    pub facing_mode: FacingMode,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Base path for detector weights.
    pub model_dir: PathBuf,
    pub detector_threshold: f32,
    pub force_fallback: bool,
    pub fallback_on_miss: bool,
    /// Pose detection cadence, independent of the display refresh.
    pub detection_interval: Duration,
    pub refresh_hz: u32,
    pub smoothing_factor: f32,
    /// Initial slider values for new sessions.
    pub placement: PlacementConfig,
    /// Register on the system bus instead of the session bus.
    pub system_bus: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Load from `TRYON_CONFIG` (if set) and `TRYON_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os("TRYON_CONFIG") {
            Some(path) => Ok(Self::from_env_over(read_file(Path::new(&path))?)),
            None => Ok(Self::from_env()),
        }
    }

    /// Environment and defaults only.
    pub fn from_env() -> Self {
        Self::from_env_over(FileConfig::default())
    }

    fn from_env_over(file: FileConfig) -> Self {
        let model_dir = std::env::var("TRYON_MODEL_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file.model_dir)
            .unwrap_or_else(tryon_core::default_model_dir);

        let facing_mode = match std::env::var("TRYON_FACING_MODE").as_deref() {
            Ok("environment") => FacingMode::Environment,
            Ok("user") => FacingMode::User,
            _ => file.facing_mode.unwrap_or_default(),
        };

        let placement = PlacementConfig {
            scale: env_f32("TRYON_PLACEMENT_SCALE", file.placement.map_or(1.0, |p| p.scale)),
            position: Offset {
                x: env_f32("TRYON_PLACEMENT_X", file.placement.map_or(0.0, |p| p.position.x)),
                y: env_f32("TRYON_PLACEMENT_Y", file.placement.map_or(0.0, |p| p.position.y)),
                z: env_f32("TRYON_PLACEMENT_Z", file.placement.map_or(0.0, |p| p.position.z)),
            },
        }
        .clamped();

        Self {
            camera_device: std::env::var("TRYON_CAMERA_DEVICE")
                .ok()
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            environment_camera_device: std::env::var("TRYON_ENVIRONMENT_CAMERA_DEVICE")
                .ok()
                .or(file.environment_camera_device),
            facing_mode,
            capture_width: env_parse("TRYON_CAPTURE_WIDTH", file.capture_width.unwrap_or(640)),
            capture_height: env_parse("TRYON_CAPTURE_HEIGHT", file.capture_height.unwrap_or(480)),
            model_dir,
            detector_threshold: env_f32(
                "TRYON_DETECTOR_THRESHOLD",
                file.detector_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            ),
            force_fallback: env_bool("TRYON_FORCE_FALLBACK", file.force_fallback.unwrap_or(false)),
            fallback_on_miss: env_bool("TRYON_FALLBACK_ON_MISS", file.fallback_on_miss.unwrap_or(false)),
            detection_interval: Duration::from_millis(env_parse(
                "TRYON_DETECTION_INTERVAL_MS",
                file.detection_interval_ms.unwrap_or(30),
            )),
            refresh_hz: env_parse("TRYON_REFRESH_HZ", file.refresh_hz.unwrap_or(60)).max(1),
            smoothing_factor: env_f32(
                "TRYON_SMOOTHING_FACTOR",
                file.smoothing_factor.unwrap_or(DEFAULT_SMOOTHING_FACTOR),
            ),
            placement,
            system_bus: env_bool("TRYON_SYSTEM_BUS", file.system_bus.unwrap_or(false)),
        }
    }

    pub fn devices(&self) -> DeviceMap {
        DeviceMap {
            user: Some(self.camera_device.clone()),
            environment: self.environment_camera_device.clone(),
        }
    }

    pub fn camera_request(&self) -> CameraRequest {
        CameraRequest {
            facing: self.facing_mode,
            width: self.capture_width,
            height: self.capture_height,
        }
    }

    pub fn estimator_options(&self) -> EstimatorOptions {
        EstimatorOptions {
            confidence_threshold: self.detector_threshold,
            force_fallback: self.force_fallback,
            fallback_on_miss: self.fallback_on_miss,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz))
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_file(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env_parse(key, default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0" && v != "false").unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
