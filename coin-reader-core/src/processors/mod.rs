//! Processors of the pulse pipeline.
//!
//! - `PulseDetector`: watches an `InputLine`, emits `PulseEvent`
//! - `EventReporter`: receives `PulseEvent`, sends it over WebSocket

pub mod event_reporter;
pub mod pulse_detector;

pub use event_reporter::{ConnectionState, Delivery, EventReporter, ReporterError, ReporterSink};
pub use pulse_detector::{EdgeTracker, PulseDetector};
