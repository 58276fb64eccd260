use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::detect::{DecodeParams, SuppressionMode};
use crate::stream::ReconnectPolicy;

const DEFAULT_STREAM_URL: &str = "stub://camera";
const DEFAULT_MODEL_PATH: &str = "model.onnx";
const DEFAULT_ALERT_URL: &str = "http://127.0.0.1:4000/api/mold-alerts";
const DEFAULT_DEVICE_ID: &str = "edge-cam-1";
const DEFAULT_CLASS_NAMES: [&str; 2] = ["fresh", "moldy"];
const DEFAULT_ALERT_CLASS: usize = 1;
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_SAMPLE_STRIDE: u64 = 5;
const DEFAULT_MAX_BOXES: usize = 100;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_OPEN_BACKOFF_MS: u64 = 2_000;
const DEFAULT_READ_FAILURE_PAUSE_MS: u64 = 500;
const DEFAULT_LOOP_YIELD_MS: u64 = 10;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
const DEFAULT_ALERT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;
const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Model paths with this prefix select the scripted stub engine.
pub const STUB_MODEL_PREFIX: &str = "stub://";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SentinelConfigFile {
    sample_stride: Option<u64>,
    loop_yield_ms: Option<u64>,
    health_interval_secs: Option<u64>,
    stream: Option<StreamConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    url: Option<String>,
    read_timeout_ms: Option<u64>,
    open_backoff_ms: Option<u64>,
    read_failure_pause_ms: Option<u64>,
    synthetic_width: Option<u32>,
    synthetic_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_height: Option<u32>,
    input_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    class_names: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_boxes: Option<usize>,
    suppression: Option<SuppressionMode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    endpoint: Option<String>,
    device_id: Option<String>,
    alert_classes: Option<Vec<usize>>,
    timeout_ms: Option<u64>,
    thumbnail_quality: Option<u8>,
    dispatch: Option<DispatchMode>,
    queue_capacity: Option<usize>,
}

/// How alerts reach the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Deliver on the capture thread.
    #[default]
    Inline,
    /// Deliver from a worker thread behind a bounded queue.
    Queued,
}

/// Process-lifetime configuration.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub stream: StreamSettings,
    pub model: ModelSettings,
    pub detection: DetectionSettings,
    pub alert: AlertConfig,
    pub sample_stride: u64,
    pub loop_yield: Duration,
    pub health_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub read_timeout: Duration,
    pub open_backoff: Duration,
    pub read_failure_pause: Duration,
    pub synthetic_width: u32,
    pub synthetic_height: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub input_height: u32,
    pub input_width: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub class_names: Vec<String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_boxes: usize,
    pub suppression: SuppressionMode,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub endpoint: String,
    pub device_id: String,
    pub alert_classes: Vec<usize>,
    pub timeout: Duration,
    pub thumbnail_quality: u8,
    pub dispatch: DispatchMode,
    pub queue_capacity: usize,
}

/// Command-line values; each `Some` wins over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub stream_url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub alert_url: Option<String>,
    pub device_id: Option<String>,
}

impl SentinelConfig {
    /// Load from the file named by `SENTINEL_CONFIG` (if set), apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Self::load_with(config_path.as_deref(), &ConfigOverrides::default())
    }

    /// Load from an explicit file (or defaults), then environment, then
    /// `overrides`, then validate.
    pub fn load_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();

        Self {
            stream: StreamSettings {
                url: stream.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
                read_timeout: Duration::from_millis(
                    stream.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
                ),
                open_backoff: Duration::from_millis(
                    stream.open_backoff_ms.unwrap_or(DEFAULT_OPEN_BACKOFF_MS),
                ),
                read_failure_pause: Duration::from_millis(
                    stream
                        .read_failure_pause_ms
                        .unwrap_or(DEFAULT_READ_FAILURE_PAUSE_MS),
                ),
                synthetic_width: stream.synthetic_width.unwrap_or(DEFAULT_SYNTHETIC_WIDTH),
                synthetic_height: stream.synthetic_height.unwrap_or(DEFAULT_SYNTHETIC_HEIGHT),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_height: model.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                input_width: model.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            detection: DetectionSettings {
                class_names: detection.class_names.unwrap_or_else(|| {
                    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
                }),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONF_THRESHOLD),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                max_boxes: detection.max_boxes.unwrap_or(DEFAULT_MAX_BOXES),
                suppression: detection.suppression.unwrap_or_default(),
            },
            alert: AlertConfig {
                endpoint: alert
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_ALERT_URL.to_string()),
                device_id: alert
                    .device_id
                    .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
                alert_classes: alert
                    .alert_classes
                    .unwrap_or_else(|| vec![DEFAULT_ALERT_CLASS]),
                timeout: Duration::from_millis(
                    alert.timeout_ms.unwrap_or(DEFAULT_ALERT_TIMEOUT_MS),
                ),
                thumbnail_quality: alert
                    .thumbnail_quality
                    .unwrap_or(DEFAULT_THUMBNAIL_QUALITY),
                dispatch: alert.dispatch.unwrap_or_default(),
                queue_capacity: alert.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            },
            sample_stride: file.sample_stride.unwrap_or(DEFAULT_SAMPLE_STRIDE),
            loop_yield: Duration::from_millis(file.loop_yield_ms.unwrap_or(DEFAULT_LOOP_YIELD_MS)),
            health_interval: Duration::from_secs(
                file.health_interval_secs
                    .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("SENTINEL_STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(path) = env_value("SENTINEL_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(url) = env_value("SENTINEL_ALERT_URL") {
            self.alert.endpoint = url;
        }
        if let Some(device_id) = env_value("SENTINEL_DEVICE_ID") {
            self.alert.device_id = device_id;
        }
        if let Some(names) = env_value("SENTINEL_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.detection.class_names = parsed;
            }
        }
        if let Some(classes) = env_value("SENTINEL_ALERT_CLASSES") {
            self.alert.alert_classes = split_csv(&classes)
                .iter()
                .map(|c| c.parse::<usize>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| {
                    anyhow!("SENTINEL_ALERT_CLASSES must be a comma-separated list of class ids")
                })?;
        }
        if let Some(value) = env_value("SENTINEL_CONF_THRESHOLD") {
            self.detection.confidence_threshold = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CONF_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_value("SENTINEL_IOU_THRESHOLD") {
            self.detection.iou_threshold = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_IOU_THRESHOLD must be a number"))?;
        }
        if let Some(value) = env_value("SENTINEL_SAMPLE_STRIDE") {
            self.sample_stride = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_SAMPLE_STRIDE must be a positive integer"))?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.stream_url {
            self.stream.url = url.clone();
        }
        if let Some(path) = &overrides.model_path {
            self.model.path = path.clone();
        }
        if let Some(url) = &overrides.alert_url {
            self.alert.endpoint = url.clone();
        }
        if let Some(device_id) = &overrides.device_id {
            self.alert.device_id = device_id.clone();
        }
    }

    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.url.trim().is_empty() {
            return Err(anyhow!("stream url must not be empty"));
        }
        if !self.is_stub_model() && !self.model.path.is_file() {
            return Err(anyhow!(
                "model file {} does not exist",
                self.model.path.display()
            ));
        }
        if self.model.input_height == 0 || self.model.input_width == 0 {
            return Err(anyhow!(
                "model input size must be non-zero, got {}x{}",
                self.model.input_height,
                self.model.input_width
            ));
        }
        if self.detection.class_names.is_empty() {
            return Err(anyhow!("class name table must not be empty"));
        }
        let conf = self.detection.confidence_threshold;
        if !conf.is_finite() || conf < 0.0 {
            return Err(anyhow!(
                "confidence threshold must be a non-negative number, got {}",
                conf
            ));
        }
        let iou = self.detection.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!("IoU threshold must be within [0, 1], got {}", iou));
        }
        if self.detection.max_boxes == 0 {
            return Err(anyhow!("max boxes must be at least 1"));
        }
        if self.sample_stride == 0 {
            return Err(anyhow!("sample stride must be at least 1"));
        }
        if self.alert.device_id.trim().is_empty() {
            return Err(anyhow!("device id must not be empty"));
        }
        let endpoint = Url::parse(&self.alert.endpoint)
            .map_err(|e| anyhow!("invalid alert endpoint {}: {}", self.alert.endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "alert endpoint must be http(s), got {}",
                self.alert.endpoint
            ));
        }
        if self.alert.timeout.is_zero() {
            return Err(anyhow!("alert timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.alert.thumbnail_quality) {
            return Err(anyhow!(
                "thumbnail quality must be within 1..=100, got {}",
                self.alert.thumbnail_quality
            ));
        }
        if self.alert.queue_capacity == 0 {
            return Err(anyhow!("alert queue capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn is_stub_model(&self) -> bool {
        self.model
            .path
            .to_str()
            .is_some_and(|p| p.starts_with(STUB_MODEL_PREFIX))
    }

    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams {
            confidence_threshold: self.detection.confidence_threshold,
            iou_threshold: self.detection.iou_threshold,
            max_boxes: self.detection.max_boxes,
            suppression: self.detection.suppression,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            open_backoff: self.stream.open_backoff,
            read_failure_pause: self.stream.read_failure_pause,
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
