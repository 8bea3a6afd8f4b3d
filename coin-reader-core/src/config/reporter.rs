use std::time::Duration;
use url::Url;

/// Event reporter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: Url,
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the connection dead.
    pub ping_timeout: Duration,
    /// Upper bound on a single connection attempt, handshake included.
    pub connect_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_base: Duration,
    /// Cap on the reconnect delay.
    pub reconnect_max: Duration,
}

impl ReporterConfig {
    /// Configuration with default timings for `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}
