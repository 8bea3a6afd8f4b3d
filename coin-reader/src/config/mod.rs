//! Configuration module for coin-reader.
//!
//! Handles loading configuration from an optional TOML file, CLI
//! overrides, and the environment.

pub mod file;

use crate::config::file::FileConfig;
use coin_reader_core::config::{PulseDetectorConfig, ReporterConfig};
use coin_reader_core::line::Bias;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable holding the WebSocket endpoint.
pub const ENDPOINT_ENV_VAR: &str = "COIN_READER_WS_URL";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("COIN_READER_WS_URL environment variable not set")]
    MissingEndpoint,

    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

/// Loaded configuration, ready to hand to the core components.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub detector: PulseDetectorConfig,
    pub reporter: ReporterConfig,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    pin_override: Option<u8>,
}

impl ConfigLoader {
    /// Create a new config loader. Without a path, defaults are used.
    pub fn new(config_path: Option<&Path>, pin_override: Option<u8>) -> Self {
        Self {
            config_path: config_path.map(Path::to_path_buf),
            pin_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file, if one was given
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Build the core configuration for `endpoint`
    pub fn load(&self, endpoint: Url) -> Result<LoadedConfig, ConfigError> {
        let mut file_config = match &self.config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => FileConfig::default(),
        };

        if let Some(pin) = self.pin_override {
            file_config.pulse.pin = pin;
        }

        validate(&file_config)?;

        Ok(build_loaded_config(file_config, endpoint))
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let pulse = &config.pulse;
    let reporter = &config.reporter;

    if pulse.debounce_ms == 0 {
        return Err(ConfigError::ValidationError(
            "pulse.debounce_ms must be greater than zero".to_string(),
        ));
    }
    if reporter.ping_interval_secs == 0 || reporter.connect_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reporter intervals and timeouts must be greater than zero".to_string(),
        ));
    }
    if reporter.ping_timeout_secs == 0 || reporter.ping_timeout_secs >= reporter.ping_interval_secs
    {
        return Err(ConfigError::ValidationError(format!(
            "reporter.ping_timeout_secs ({}) must be between 1 and ping_interval_secs ({})",
            reporter.ping_timeout_secs, reporter.ping_interval_secs
        )));
    }
    if reporter.reconnect_base_ms == 0 || reporter.reconnect_base_ms > reporter.reconnect_max_ms {
        return Err(ConfigError::ValidationError(format!(
            "reporter.reconnect_base_ms ({}) must be between 1 and reconnect_max_ms ({})",
            reporter.reconnect_base_ms, reporter.reconnect_max_ms
        )));
    }
    Ok(())
}

fn build_loaded_config(file_config: FileConfig, endpoint: Url) -> LoadedConfig {
    let pulse = file_config.pulse;
    let reporter = file_config.reporter;

    LoadedConfig {
        detector: PulseDetectorConfig {
            pin: pulse.pin,
            pulse_level: pulse.pulse_level,
            debounce: Duration::from_millis(pulse.debounce_ms),
            bias: Bias::PullUp,
        },
        reporter: ReporterConfig {
            endpoint,
            ping_interval: Duration::from_secs(reporter.ping_interval_secs),
            ping_timeout: Duration::from_secs(reporter.ping_timeout_secs),
            connect_timeout: Duration::from_secs(reporter.connect_timeout_secs),
            reconnect_base: Duration::from_millis(reporter.reconnect_base_ms),
            reconnect_max: Duration::from_millis(reporter.reconnect_max_ms),
        },
    }
}

/// Get the endpoint URL from the environment.
pub fn get_endpoint_url() -> Result<Url, ConfigError> {
    let raw = std::env::var(ENDPOINT_ENV_VAR).map_err(|_| ConfigError::MissingEndpoint)?;
    parse_endpoint(&raw)
}

/// Parse and check a WebSocket endpoint URL.
pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other:?}, expected ws or wss"))),
    }
}
