//! Coin Reader
//!
//! Watches a coin acceptor's pulse line and reports every inserted coin to
//! a remote listener over WebSocket.

mod config;
mod gpio;
mod shutdown;

use clap::{Parser, ValueEnum};
use coin_reader_core::processors::{EventReporter, PulseDetector};
use config::{ConfigLoader, get_endpoint_url};
use shutdown::shutdown_signal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Coin Reader - coin acceptor pulse reporter
#[derive(Parser, Debug)]
#[command(name = "coin-reader")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the BCM pin wired to the coin acceptor
    #[arg(short, long)]
    pin: Option<u8>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load .env before anything reads the environment
    let dotenv = dotenvy::dotenv();

    init_tracing(args.log_format);

    if let Err(e) = dotenv {
        if !e.not_found() {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    tracing::info!("Starting coin-reader v{}", env!("CARGO_PKG_VERSION"));

    let endpoint = get_endpoint_url().map_err(|e| {
        tracing::error!("Invalid endpoint configuration: {}", e);
        e
    })?;

    let loaded_config = ConfigLoader::new(args.config.as_deref(), args.pin)
        .load(endpoint)
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    match &args.config {
        Some(path) => tracing::info!("Configuration loaded from {:?}", path),
        None => tracing::info!("No configuration file given, using defaults"),
    }

    let reporter = EventReporter::new(loaded_config.reporter);
    let mut detector = PulseDetector::new(loaded_config.detector, gpio::open_line());

    let sink = Arc::new(reporter.pulse_sink(Handle::current()));
    if let Err(e) = detector.initialize(sink) {
        tracing::error!(
            pin = detector.config().pin,
            "Failed to initialize pulse detector: {}",
            e
        );
        detector.shutdown();
        return Err(e.into());
    }

    reporter.start();

    let signal_result = shutdown_signal().await;
    if let Err(e) = &signal_result {
        tracing::error!("Failed to install signal handlers: {}", e);
    }

    // Stop producing events before tearing down the connection
    detector.shutdown();
    reporter.shutdown().await;

    tracing::info!(
        pulses = detector.pulses_detected(),
        "coin-reader shutdown complete"
    );

    signal_result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
