//! Digital input line abstraction.
//!
//! The pulse detector never talks to GPIO hardware directly. It drives an
//! [`InputLine`], which knows how to claim a pin, report its level, and
//! deliver debounced edge notifications on its own thread.
//!
//! Implementations:
//!
//! - [`SimulatedLine`]: in-memory line driven by tests.
//! - `RpiLine` in the daemon crate (behind the `rpi` feature).

mod simulated;

pub use simulated::SimulatedLine;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Low,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::High => write!(f, "high"),
            Level::Low => write!(f, "low"),
        }
    }
}

/// Internal resistor bias applied when a line is claimed as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    PullUp,
    PullDown,
    Floating,
}

/// Closure invoked by the line on every debounced edge, with the level
/// observed at notification time.
pub type EdgeCallback = Box<dyn FnMut(Level) + Send + 'static>;

/// Errors raised by the hardware boundary.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The line does not exist or is held by another process.
    #[error("input line {pin} unavailable: {reason}")]
    LineUnavailable { pin: u8, reason: String },

    /// Edge notifications could not be registered.
    #[error("failed to watch input line {pin}: {reason}")]
    WatchFailed { pin: u8, reason: String },

    /// `watch` was called before `claim`.
    #[error("input line has not been claimed")]
    NotClaimed,

    /// The detector already owns the line.
    #[error("pulse detector is already initialized")]
    AlreadyInitialized,
}

/// A single digital input line with debounced edge notification.
///
/// Callbacks registered through [`watch`](InputLine::watch) run on the
/// implementation's notification thread, not on the caller's.
pub trait InputLine: Send {
    /// Configure `pin` as an input with the given bias and return its
    /// current level.
    fn claim(&mut self, pin: u8, bias: Bias) -> Result<Level, HardwareError>;

    /// Register `callback` for transitions in both directions. Transitions
    /// closer together than `debounce` are coalesced by the implementation.
    fn watch(&mut self, debounce: Duration, callback: EdgeCallback) -> Result<(), HardwareError>;

    /// Deregister the callback and free the line. Must be idempotent.
    fn release(&mut self);
}

impl<L: InputLine + ?Sized> InputLine for Box<L> {
    fn claim(&mut self, pin: u8, bias: Bias) -> Result<Level, HardwareError> {
        (**self).claim(pin, bias)
    }

    fn watch(&mut self, debounce: Duration, callback: EdgeCallback) -> Result<(), HardwareError> {
        (**self).watch(debounce, callback)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
