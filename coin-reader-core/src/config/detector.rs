use crate::line::{Bias, Level};
use std::time::Duration;

/// Default BCM pin wired to the coin acceptor.
pub const DEFAULT_PIN: u8 = 2;

/// Default debounce window for edge notifications.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(36);

/// Pulse detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseDetectorConfig {
    /// Input line to watch.
    pub pin: u8,
    /// Level that signals a coin pulse. The acceptor pulls the line low
    /// against the pull-up, so this is `Low` by default.
    pub pulse_level: Level,
    /// Minimum spacing between edge notifications.
    pub debounce: Duration,
    /// Bias applied when claiming the line.
    pub bias: Bias,
}

impl Default for PulseDetectorConfig {
    fn default() -> Self {
        Self {
            pin: DEFAULT_PIN,
            pulse_level: Level::Low,
            debounce: DEFAULT_DEBOUNCE,
            bias: Bias::PullUp,
        }
    }
}
