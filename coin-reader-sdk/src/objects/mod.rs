pub mod event;

pub use event::ReporterMessage;
