//! Configuration management for drowsywatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::ear::DROWSY_EAR_THRESHOLD;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "drowsywatch";

/// Environment variable prefix for every config key.
const ENV_PREFIX: &str = "DROWSYWATCH_";

/// Unprefixed variables accepted for compatibility with existing deployments.
const LEGACY_ENV_KEYS: &[&str] = &[
    "PORT",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_PHONE",
];

/// Prefixed variables read as plain strings, keyed by their name after the
/// prefix. `Env` would turn `+15550001111` or an all-digit token into an
/// integer.
const PREFIXED_STRING_KEYS: &[(&str, &str)] = &[
    ("SMS__ACCOUNT_SID", "sms.account_sid"),
    ("SMS__AUTH_TOKEN", "sms.auth_token"),
    ("SMS__FROM_PHONE", "sms.from_phone"),
];

/// 68-point LBF facemark model, same landmark layout as the iBUG annotations.
const DEFAULT_MODEL_URL: &str =
    "https://raw.githubusercontent.com/kurnianggoro/GSOC2017/master/data/lbfmodel.yaml";

const DEFAULT_FACE_CASCADE: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Legacy variables `PORT`, `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_PHONE`
/// 2. Environment variables prefixed with `DROWSYWATCH_` (`__` separates sections)
/// 3. TOML config file at `~/.config/drowsywatch/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Detection configuration.
    pub detection: DetectionConfig,
    /// Frame source configuration.
    pub camera: CameraConfig,
    /// Landmark model configuration.
    pub model: ModelConfig,
    /// SMS alert configuration.
    pub sms: SmsConfig,
    /// Local sound alert configuration.
    pub sound: SoundConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,
}

/// Detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Average EAR below which a frame counts as drowsy.
    pub ear_threshold: f64,
    /// JPEG quality for streamed frames (1-100).
    pub jpeg_quality: u8,
    /// Draw the warning label on drowsy frames.
    pub overlay: bool,
}

/// Which vision backend produces frames, faces and landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    /// Live camera via `OpenCV` (requires the `opencv` feature).
    Opencv,
    /// Still images with `.pts` landmark sidecars, replayed from a directory.
    Replay,
}

impl std::fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opencv => write!(f, "opencv"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

/// Frame source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Backend to open for each stream.
    pub backend: CameraBackend,
    /// Camera device index for the `OpenCV` backend.
    pub index: i32,
    /// Directory of frames for the replay backend.
    pub replay_dir: Option<PathBuf>,
    /// Haar cascade used by the `OpenCV` face detector.
    pub face_cascade: PathBuf,
}

/// Landmark model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Where the model lives on disk.
    pub path: PathBuf,
    /// Where to fetch the model from when it is missing.
    pub url: String,
    /// Fetch the model at startup if it is missing.
    pub auto_download: bool,
}

/// SMS alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Send SMS alerts when credentials are present.
    pub enabled: bool,
    /// Twilio account SID.
    pub account_sid: Option<String>,
    /// Twilio auth token.
    pub auth_token: Option<String>,
    /// Sender phone number.
    pub from_phone: Option<String>,
    /// API base URL.
    pub api_base: String,
    /// Message text.
    pub body: String,
}

/// Local sound alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Play a sound on every drowsy frame (requires the `sound` feature).
    pub enabled: bool,
    /// WAV file to play.
    pub path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ear_threshold: DROWSY_EAR_THRESHOLD,
            jpeg_quality: 80,
            overlay: true,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "opencv") {
                CameraBackend::Opencv
            } else {
                CameraBackend::Replay
            },
            index: 0,
            replay_dir: None,
            face_cascade: PathBuf::from(DEFAULT_FACE_CASCADE),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lbfmodel.yaml"),
            url: DEFAULT_MODEL_URL.to_string(),
            auto_download: true,
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            account_sid: None,
            auth_token: None,
            from_phone: None,
            api_base: "https://api.twilio.com".to_string(),
            body: "Drowsiness detected! Please check on the driver.".to_string(),
        }
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("alert.wav"),
        }
    }
}

/// Map a legacy environment variable to its config key.
fn legacy_env_key(key: &str) -> &'static str {
    match key.to_ascii_uppercase().as_str() {
        "PORT" => "server.port",
        "TWILIO_ACCOUNT_SID" => "sms.account_sid",
        "TWILIO_AUTH_TOKEN" => "sms.auth_token",
        "TWILIO_PHONE" => "sms.from_phone",
        _ => "unknown",
    }
}

/// Legacy variables as a provider.
///
/// Values are taken verbatim rather than through `Env`, which would read a
/// phone number like `+15551234567` as an integer and drop the `+`.
fn legacy_env() -> Figment {
    LEGACY_ENV_KEYS
        .iter()
        .filter_map(|&name| std::env::var(name).ok().map(|value| (name, value)))
        .fold(Figment::new(), |figment, (name, value)| {
            let key = legacy_env_key(name);
            match value.parse::<u16>() {
                Ok(port) if key == "server.port" => {
                    figment.merge(Serialized::default(key, port))
                }
                _ => figment.merge(Serialized::default(key, value)),
            }
        })
}

/// The `DROWSYWATCH_` variables in [`PREFIXED_STRING_KEYS`] as a provider.
fn prefixed_string_env() -> Figment {
    PREFIXED_STRING_KEYS
        .iter()
        .filter_map(|&(suffix, key)| {
            std::env::var(format!("{ENV_PREFIX}{suffix}"))
                .ok()
                .map(|value| (key, value))
        })
        .fold(Figment::new(), |figment, (key, value)| {
            figment.merge(Serialized::default(key, value))
        })
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let string_keys: Vec<&str> = PREFIXED_STRING_KEYS
            .iter()
            .map(|&(suffix, _)| suffix)
            .collect();
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&string_keys)
                    .split("__"),
            )
            .merge(prefixed_string_env())
            .merge(legacy_env());

        let config: Config = figment.extract()?;
        config.validate_values()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration, including that the selected frame source
    /// can be opened: the replay backend needs `camera.replay_dir`.
    ///
    /// Loading only checks field values, since command-line options may still
    /// supply the source.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.validate_values()?;

        if self.camera.backend == CameraBackend::Replay && self.camera.replay_dir.is_none() {
            return Err(Error::config_validation(
                "camera.replay_dir is required for the replay backend",
            ));
        }

        Ok(())
    }

    fn validate_values(&self) -> Result<()> {
        let threshold = self.detection.ear_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(Error::config_validation(format!(
                "ear_threshold ({threshold}) must be between 0 and 1"
            )));
        }

        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return Err(Error::config_validation(format!(
                "jpeg_quality ({}) must be between 1 and 100",
                self.detection.jpeg_quality
            )));
        }

        if self.camera.backend == CameraBackend::Opencv && !cfg!(feature = "opencv") {
            return Err(Error::config_validation(
                "camera backend 'opencv' requires building with the `opencv` feature",
            ));
        }

        if reqwest::Url::parse(&self.sms.api_base).is_err() {
            return Err(Error::config_validation(format!(
                "sms.api_base is not a valid URL: {}",
                self.sms.api_base
            )));
        }

        if self.model.auto_download && reqwest::Url::parse(&self.model.url).is_err() {
            return Err(Error::config_validation(format!(
                "model.url is not a valid URL: {}",
                self.model.url
            )));
        }

        Ok(())
    }

    /// The `host:port` string the server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Whether SMS alerts are enabled and fully configured.
    #[must_use]
    pub fn sms_ready(&self) -> bool {
        self.sms.enabled
            && self.sms.account_sid.is_some()
            && self.sms.auth_token.is_some()
            && self.sms.from_phone.is_some()
    }

    /// A copy safe to print: secrets are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.sms.auth_token.is_some() {
            config.sms.auth_token = Some("********".to_string());
        }
        config
    }
}
