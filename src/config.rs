use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_CAMERA_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_COOLDOWN_MS: u64 = 30_000;
const DEFAULT_MODEL_PATH: &str = "models/yolov5s.onnx";
const DEFAULT_MODEL_URL: &str =
    "https://github.com/ultralytics/yolov5/releases/download/v7.0/yolov5s.onnx";
const DEFAULT_FAILURE_LIMIT: u32 = 5;

const EXPECT_MILLIS: &str = "an integer number of milliseconds";
const EXPECT_UNIT: &str = "a number in [0, 1]";

/// Runtime settings of a detection service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub camera_url: String,
    pub poll_interval_ms: u64,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub cooldown_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_url: DEFAULT_CAMERA_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_iou_threshold: DEFAULT_NMS_IOU_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_camera_url(&self.camera_url)?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        validate_unit("confidence threshold", self.confidence_threshold)?;
        validate_unit("nms iou threshold", self.nms_iou_threshold)?;
        Ok(())
    }
}

/// Partial settings update. Only fields that are `Some` are applied.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub camera_url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub confidence_threshold: Option<f32>,
    pub nms_iou_threshold: Option<f32>,
    pub cooldown_ms: Option<u64>,
}

impl SettingsUpdate {
    /// Returns `current` with this update merged in.
    pub fn merged_with(&self, current: &Settings) -> Settings {
        Settings {
            camera_url: self
                .camera_url
                .clone()
                .unwrap_or_else(|| current.camera_url.clone()),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(current.poll_interval_ms),
            confidence_threshold: self
                .confidence_threshold
                .unwrap_or(current.confidence_threshold),
            nms_iou_threshold: self.nms_iou_threshold.unwrap_or(current.nms_iou_threshold),
            cooldown_ms: self.cooldown_ms.unwrap_or(current.cooldown_ms),
        }
    }

    /// True when applying this update changes how the scheduler polls the camera.
    pub fn requires_restart(&self, current: &Settings) -> bool {
        let url_changed = self
            .camera_url
            .as_ref()
            .is_some_and(|url| *url != current.camera_url);
        let interval_changed = self
            .poll_interval_ms
            .is_some_and(|ms| ms != current.poll_interval_ms);
        url_changed || interval_changed
    }
}

/// Where the detector model lives and where to fetch it from when absent.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub download_url: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            download_url: Some(DEFAULT_MODEL_URL.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    poll_interval_ms: Option<u64>,
    failure_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    nms_iou_threshold: Option<f32>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    download_url: Option<String>,
}

/// Full daemon configuration: runtime settings plus model and failure policy.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub settings: Settings,
    pub model: ModelSettings,
    /// Consecutive failed camera fetches before the service enters `Error`.
    pub failure_limit: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            model: ModelSettings::default(),
            failure_limit: DEFAULT_FAILURE_LIMIT,
        }
    }
}

impl WatchConfig {
    /// Load from `$WATCH_CONFIG` (JSON, optional), then apply `WATCH_*` env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit `path` takes precedence over `$WATCH_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => non_empty_env("WATCH_CONFIG").map(PathBuf::from),
        };
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Self {
        let defaults = Self::default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let settings = Settings {
            camera_url: camera.url.unwrap_or(defaults.settings.camera_url),
            poll_interval_ms: camera
                .poll_interval_ms
                .unwrap_or(defaults.settings.poll_interval_ms),
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(defaults.settings.confidence_threshold),
            nms_iou_threshold: detection
                .nms_iou_threshold
                .unwrap_or(defaults.settings.nms_iou_threshold),
            cooldown_ms: detection
                .cooldown_ms
                .unwrap_or(defaults.settings.cooldown_ms),
        };
        let model = match file.model {
            Some(model) => ModelSettings {
                path: model.path.unwrap_or(defaults.model.path),
                download_url: model.download_url.or(defaults.model.download_url),
            },
            None => defaults.model,
        };
        Self {
            settings,
            model,
            failure_limit: camera.failure_limit.unwrap_or(defaults.failure_limit),
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = non_empty_env("WATCH_CAMERA_URL") {
            self.settings.camera_url = url;
        }
        if let Some(ms) = parse_env::<u64>("WATCH_POLL_INTERVAL_MS", EXPECT_MILLIS)? {
            self.settings.poll_interval_ms = ms;
        }
        if let Some(v) = parse_env::<f32>("WATCH_CONFIDENCE_THRESHOLD", EXPECT_UNIT)? {
            self.settings.confidence_threshold = v;
        }
        if let Some(v) = parse_env::<f32>("WATCH_NMS_IOU_THRESHOLD", EXPECT_UNIT)? {
            self.settings.nms_iou_threshold = v;
        }
        if let Some(ms) = parse_env::<u64>("WATCH_COOLDOWN_MS", EXPECT_MILLIS)? {
            self.settings.cooldown_ms = ms;
        }
        if let Some(path) = non_empty_env("WATCH_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("WATCH_MODEL_URL") {
            // An explicitly empty value disables the download.
            self.model.download_url = if url.trim().is_empty() { None } else { Some(url) };
        }
        if let Some(limit) = parse_env::<u32>("WATCH_FAILURE_LIMIT", "a positive integer")? {
            self.failure_limit = limit;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        if self.failure_limit == 0 {
            return Err(ConfigError::Invalid(
                "failure limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match non_empty_env(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, expected }),
        None => Ok(None),
    }
}

fn validate_camera_url(raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Invalid("camera url must not be empty".to_string()));
    }
    let url = url::Url::parse(raw)
        .map_err(|e| ConfigError::Invalid(format!("camera url '{}' is invalid: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "unsupported camera scheme '{}'; expected http(s)",
            other
        ))),
    }
}

fn validate_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
