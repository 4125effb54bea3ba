use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cloud::{GeminiSettings, DEFAULT_GEMINI_MODEL, DEFAULT_REQUEST_TIMEOUT};
use crate::detect::{EngineSettings, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::geofence::{CircularRegion, Coordinate, DEFAULT_STOP_RADIUS_M};
use crate::ingest::SourceSettings;
use crate::throttle::{RateLimiter, DEFAULT_MIN_INTERVAL};

const DEFAULT_MODEL_INPUT: u32 = 640;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("{key} has an invalid value '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaneConfigFile {
    source: Option<SourceConfigFile>,
    throttle: Option<ThrottleConfigFile>,
    detector: Option<DetectorConfigFile>,
    scan: Option<ScanConfigFile>,
    gemini: Option<GeminiConfigFile>,
    stop: Option<StopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ThrottleConfigFile {
    min_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    timeout_ms: Option<u64>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiConfigFile {
    api_key: Option<String>,
    prompt: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StopConfigFile {
    latitude: f64,
    longitude: f64,
    radius_m: Option<f64>,
}

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct CaneConfig {
    pub source: SourceSettings,
    pub min_interval: Duration,
    pub detector: DetectorSettings,
    pub jpeg_quality: u8,
    pub gemini: GeminiConfig,
    pub stop: Option<StopSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// `None` selects the built-in detector.
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub timeout: Option<Duration>,
    pub input_width: u32,
    pub input_height: u32,
}

/// Cloud settings as loaded; completeness is checked by `CaneConfig::cloud`.
#[derive(Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub prompt: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("prompt", &self.prompt)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopSettings {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl CaneConfig {
    /// Defaults, then the file named by `CANE_CONFIG`, then `CANE_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file_cfg = match env_string("CANE_CONFIG") {
            Some(path) => read_config_file(Path::new(&path))?,
            None => CaneConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaneConfigFile) -> Self {
        let defaults = SourceSettings::default();
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let gemini = file.gemini.unwrap_or_default();
        Self {
            source: SourceSettings {
                url: source.url.unwrap_or(defaults.url),
                fps: source.fps.unwrap_or(defaults.fps),
                width: source.width.unwrap_or(defaults.width),
                height: source.height.unwrap_or(defaults.height),
            },
            min_interval: file
                .throttle
                .and_then(|throttle| throttle.min_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_INTERVAL),
            detector: DetectorSettings {
                model_path: detector.model_path,
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                timeout: detector.timeout_ms.map(Duration::from_millis),
                input_width: detector.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: detector.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            jpeg_quality: file
                .scan
                .and_then(|scan| scan.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
            gemini: GeminiConfig {
                api_key: gemini.api_key,
                prompt: gemini.prompt,
                model: gemini
                    .model
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                timeout: gemini
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            },
            stop: file.stop.map(|stop| StopSettings {
                center: Coordinate::new(stop.latitude, stop.longitude),
                radius_m: stop.radius_m.unwrap_or(DEFAULT_STOP_RADIUS_M),
            }),
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = env_string("CANE_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = env_parse("CANE_SOURCE_FPS")? {
            self.source.fps = fps;
        }
        if let Some(ms) = env_parse("CANE_MIN_INTERVAL_MS")? {
            self.min_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_parse("CANE_CONFIDENCE_THRESHOLD")? {
            self.detector.confidence_threshold = threshold;
        }
        if let Some(path) = env_string("CANE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parse::<u64>("CANE_INFERENCE_TIMEOUT_MS")? {
            // 0 disables the timeout.
            self.detector.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(key) = env_string("CANE_GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(prompt) = env_string("CANE_GEMINI_PROMPT") {
            self.gemini.prompt = Some(prompt);
        }
        if let Some(model) = env_string("CANE_GEMINI_MODEL") {
            self.gemini.model = model;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.detector.confidence_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold must be in [0, 1), got {}",
                threshold
            )));
        }
        if self.min_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "throttle interval must be greater than zero".to_string(),
            ));
        }
        if self.source.fps == 0 {
            return Err(ConfigError::Invalid(
                "source fps must be greater than zero".to_string(),
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "source resolution must be non-zero, got {}x{}",
                self.source.width, self.source.height
            )));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(ConfigError::Invalid(
                "model input size must be non-zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if let Some(stop) = &self.stop {
            let valid = (-90.0..=90.0).contains(&stop.center.latitude)
                && (-180.0..=180.0).contains(&stop.center.longitude)
                && stop.radius_m > 0.0;
            if !valid {
                return Err(ConfigError::Invalid(format!(
                    "stop region out of range: {:?}",
                    stop
                )));
            }
        }
        Ok(())
    }

    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.min_interval)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            confidence_threshold: self.detector.confidence_threshold,
            timeout: self.detector.timeout,
        }
    }

    /// Complete cloud settings; fails fast when the key or prompt is absent or blank.
    pub fn cloud(&self) -> Result<GeminiSettings, ConfigError> {
        let api_key = self
            .gemini
            .api_key
            .as_deref()
            .and_then(non_blank)
            .ok_or(ConfigError::MissingField("gemini.api_key"))?;
        let prompt = self
            .gemini
            .prompt
            .as_deref()
            .and_then(non_blank)
            .ok_or(ConfigError::MissingField("gemini.prompt"))?;
        Ok(GeminiSettings {
            api_key,
            prompt,
            model: self.gemini.model.clone(),
            timeout: self.gemini.timeout,
        })
    }

    pub fn stop_region(&self) -> Option<CircularRegion> {
        self.stop
            .map(|stop| CircularRegion::stop(stop.center, stop.radius_m))
    }
}

fn read_config_file(path: &Path) -> Result<CaneConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().as_deref().and_then(non_blank)
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        None => Ok(None),
    }
}
