//! Events flowing from the pulse detector to the reporter.
//!
//! # Event Flow
//!
//! 1. `InputLine` notifies the detector of a level change
//! 2. `PulseDetector` recognizes an edge into the pulse level and emits `PulseEvent`
//! 3. A `PulseSink` (normally the `EventReporter`) receives it and sends it
//!
//! Events are ephemeral: nothing is queued or persisted between steps.

pub mod types;

pub use types::{PulseEvent, PulseSink, unix_now};
