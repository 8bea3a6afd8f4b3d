//! PulseDetector processor.
//!
//! The PulseDetector is responsible for:
//! - Claiming the coin acceptor's input line with a pull bias
//! - Registering an edge callback with the line's debounced notifications
//! - Recognizing transitions *into* the pulse level and emitting exactly
//!   one `PulseEvent` for each
//! - Releasing the line on shutdown
//!
//! A coin drop produces an active-then-inactive pair of edges. Reacting
//! only to the edge into the pulse level counts that pair once.

use crate::config::PulseDetectorConfig;
use crate::events::{PulseEvent, PulseSink};
use crate::line::{HardwareError, InputLine, Level};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

/// Tracks the last observed level and decides which edges qualify.
#[derive(Debug, Clone, Copy)]
pub struct EdgeTracker {
    pulse_level: Level,
    last: Level,
}

impl EdgeTracker {
    pub fn new(pulse_level: Level, initial: Level) -> Self {
        Self {
            pulse_level,
            last: initial,
        }
    }

    /// Record `level` and return whether it completes a transition into
    /// the pulse level.
    pub fn observe(&mut self, level: Level) -> bool {
        let qualifies = level == self.pulse_level && self.last != self.pulse_level;
        self.last = level;
        qualifies
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    Idle,
    Watching,
    Released,
}

/// PulseDetector turns edge notifications from an [`InputLine`] into
/// [`PulseEvent`]s.
pub struct PulseDetector<L: InputLine> {
    config: PulseDetectorConfig,
    line: L,
    state: DetectorState,
    pulses: Arc<AtomicU64>,
}

impl<L: InputLine> PulseDetector<L> {
    /// Create a new PulseDetector over `line`. Nothing is claimed until
    /// [`initialize`](PulseDetector::initialize).
    pub fn new(config: PulseDetectorConfig, line: L) -> Self {
        Self {
            config,
            line,
            state: DetectorState::Idle,
            pulses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claim the line and start forwarding pulses to `sink`.
    ///
    /// A claim failure means the pin is misconfigured or owned by someone
    /// else; it is returned to the caller and not retried.
    pub fn initialize(&mut self, sink: Arc<dyn PulseSink>) -> Result<(), HardwareError> {
        if self.state == DetectorState::Watching {
            return Err(HardwareError::AlreadyInitialized);
        }

        let pin = self.config.pin;
        let initial = self.line.claim(pin, self.config.bias)?;
        info!(
            pin,
            initial_level = %initial,
            pulse_level = %self.config.pulse_level,
            "Input line claimed"
        );

        let mut tracker = EdgeTracker::new(self.config.pulse_level, initial);
        let pulses = Arc::clone(&self.pulses);
        let callback = Box::new(move |level: Level| {
            if tracker.observe(level) {
                let total = pulses.fetch_add(1, Ordering::Relaxed) + 1;
                let event = PulseEvent::now();
                info!(total, timestamp = event.timestamp, "Pulse detected");
                sink.submit(event);
            } else {
                trace!(%level, "Edge ignored");
            }
        });

        if let Err(e) = self.line.watch(self.config.debounce, callback) {
            warn!(pin, error = %e, "Failed to register edge callback, releasing line");
            self.line.release();
            self.state = DetectorState::Released;
            return Err(e);
        }

        self.state = DetectorState::Watching;
        debug!(
            pin,
            debounce_ms = self.config.debounce.as_millis() as u64,
            "Edge callback registered"
        );
        Ok(())
    }

    /// Deregister the callback and release the line. Safe to call any
    /// number of times.
    pub fn shutdown(&mut self) {
        self.line.release();
        if self.state == DetectorState::Watching {
            info!(
                pin = self.config.pin,
                pulses = self.pulses_detected(),
                "Input line released"
            );
        }
        self.state = DetectorState::Released;
    }

    /// Qualifying transitions seen since construction.
    pub fn pulses_detected(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &PulseDetectorConfig {
        &self.config
    }
}

impl<L: InputLine> Drop for PulseDetector<L> {
    fn drop(&mut self) {
        self.line.release();
    }
}
