//! Runtime configuration for the core components.
//!
//! These are the validated, typed forms. Loading them from files, CLI
//! arguments, and the environment is the daemon's job.

mod detector;
mod reporter;

pub use detector::PulseDetectorConfig;
pub use reporter::ReporterConfig;
