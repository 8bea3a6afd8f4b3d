//! TOML file configuration structures.
//!
//! Every section and key is optional; missing values take the defaults
//! below.

use coin_reader_core::line::Level;
use serde::{Deserialize, Serialize};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Pulse detection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// BCM pin number of the coin acceptor signal.
    #[serde(default = "default_pin")]
    pub pin: u8,
    /// Level that marks a pulse: `"low"` or `"high"`.
    #[serde(default = "default_pulse_level")]
    pub pulse_level: Level,
    /// Debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            pin: default_pin(),
            pulse_level: default_pulse_level(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_pin() -> u8 {
    2
}

fn default_pulse_level() -> Level {
    Level::Low
}

fn default_debounce_ms() -> u64 {
    36
}

/// Event reporter section. The endpoint itself comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}
