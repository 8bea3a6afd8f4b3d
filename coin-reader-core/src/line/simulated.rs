//! In-memory input line.

use super::{Bias, EdgeCallback, HardwareError, InputLine, Level};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// An [`InputLine`] whose level is set by the caller.
///
/// Clones share the same line, so a test can hand one clone to the
/// detector and drive the signal through another. Every call to
/// [`set_level`](SimulatedLine::set_level) is delivered to the registered
/// callback as-is, including repeats of the current level; no debouncing
/// is applied.
#[derive(Clone)]
pub struct SimulatedLine {
    inner: Arc<Mutex<SimulatedInner>>,
}

struct SimulatedInner {
    level: Level,
    busy: bool,
    fail_watch: bool,
    claimed_pin: Option<u8>,
    bias: Option<Bias>,
    debounce: Option<Duration>,
    callback: Option<EdgeCallback>,
    releases: u32,
}

impl SimulatedLine {
    /// A free line resting at `level`.
    pub fn new(level: Level) -> Self {
        Self::build(level, false, false)
    }

    /// A line that is already held elsewhere; `claim` fails.
    pub fn busy() -> Self {
        Self::build(Level::High, true, false)
    }

    /// A line that can be claimed but refuses edge registration.
    pub fn without_interrupts(level: Level) -> Self {
        Self::build(level, false, true)
    }

    fn build(level: Level, busy: bool, fail_watch: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatedInner {
                level,
                busy,
                fail_watch,
                claimed_pin: None,
                bias: None,
                debounce: None,
                callback: None,
                releases: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive the line to `level` and notify the watcher, if any.
    ///
    /// The callback runs on the calling thread with the internal lock
    /// released.
    pub fn set_level(&self, level: Level) {
        let callback = {
            let mut inner = self.lock();
            inner.level = level;
            inner.callback.take()
        };

        if let Some(mut callback) = callback {
            callback(level);
            let mut inner = self.lock();
            // Released while the callback ran: drop it.
            if inner.claimed_pin.is_some() && inner.callback.is_none() {
                inner.callback = Some(callback);
            }
        }
    }

    /// Pin currently claimed, if any.
    pub fn claimed_pin(&self) -> Option<u8> {
        self.lock().claimed_pin
    }

    /// Bias requested by the last claim.
    pub fn bias(&self) -> Option<Bias> {
        self.lock().bias
    }

    /// Debounce window requested by the last `watch`.
    pub fn debounce(&self) -> Option<Duration> {
        self.lock().debounce
    }

    /// Whether a callback is registered.
    pub fn is_watched(&self) -> bool {
        self.lock().callback.is_some()
    }

    /// Number of `release` calls that actually freed the line.
    pub fn release_count(&self) -> u32 {
        self.lock().releases
    }
}

impl InputLine for SimulatedLine {
    fn claim(&mut self, pin: u8, bias: Bias) -> Result<Level, HardwareError> {
        let mut inner = self.lock();
        if inner.busy || inner.claimed_pin.is_some() {
            return Err(HardwareError::LineUnavailable {
                pin,
                reason: "line is busy".to_string(),
            });
        }
        inner.claimed_pin = Some(pin);
        inner.bias = Some(bias);
        Ok(inner.level)
    }

    fn watch(&mut self, debounce: Duration, callback: EdgeCallback) -> Result<(), HardwareError> {
        let mut inner = self.lock();
        let Some(pin) = inner.claimed_pin else {
            return Err(HardwareError::NotClaimed);
        };
        if inner.fail_watch {
            return Err(HardwareError::WatchFailed {
                pin,
                reason: "interrupts unavailable".to_string(),
            });
        }
        inner.debounce = Some(debounce);
        inner.callback = Some(callback);
        Ok(())
    }

    fn release(&mut self) {
        let mut inner = self.lock();
        inner.callback = None;
        if inner.claimed_pin.take().is_some() {
            inner.releases += 1;
        }
    }
}
