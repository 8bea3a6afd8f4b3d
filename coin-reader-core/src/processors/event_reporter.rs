//! EventReporter processor.
//!
//! The EventReporter is responsible for:
//! - Keeping a WebSocket connection to the configured endpoint open
//! - Reconnecting with capped exponential backoff whenever it drops
//! - Exchanging ping/pong liveness probes and treating a missing pong as
//!   a dead connection
//! - Sending one `coin_inserted` text frame per `PulseEvent`
//!
//! Each frame is stamped with the send time while the writer lock is held,
//! so frame order and timestamp order agree. Delivery is at-most-once. An event sent while no connection is live is
//! logged and dropped; a failed write is logged and not retried.
//!
//! The write half of the connection sits behind a single async mutex. Every
//! frame written (events and pings) and every replacement of the handle
//! happens while holding it, so a reconnect never interleaves with a
//! partially written frame.

use crate::config::ReporterConfig;
use crate::events::{PulseEvent, PulseSink, unix_now};
use crate::utils::reconnect_delay::reconnect_delay;
use coin_reader_sdk::objects::ReporterMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

/// Upper bound on sending a close frame to a peer that may be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Errors that end a single connection. None of these escape the
/// reporter; they are logged and followed by a reconnect.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// Handshake or transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection attempt exceeded `connect_timeout`
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// No pong within `ping_timeout`
    #[error("no pong received within {0:?}")]
    LivenessTimeout(Duration),

    /// The peer sent a close frame or the stream ended
    #[error("connection closed by peer")]
    ClosedByPeer,

    /// The write half was taken by shutdown
    #[error("not connected")]
    NotConnected,
}

/// Connection lifecycle as observed from outside the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: `shutdown()` was called.
    Closed,
}

/// Outcome of [`EventReporter::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the live connection.
    Sent,
    /// No live connection; the event was discarded.
    Dropped,
    /// The write failed; the event was discarded.
    Failed,
}

/// EventReporter delivers pulse events over a self-healing WebSocket
/// connection.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct EventReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    config: ReporterConfig,
    outbound: Mutex<Option<WsSink>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventReporter {
    /// Create a new EventReporter. No connection is made until
    /// [`start`](EventReporter::start).
    pub fn new(config: ReporterConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ReporterInner {
                config,
                outbound: Mutex::new(None),
                state_tx,
                shutdown_tx,
                task: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Spawn the connect/serve/reconnect cycle on the current runtime.
    ///
    /// The cycle runs until [`shutdown`](EventReporter::shutdown). Calling
    /// `start` again, or after shutdown, does nothing.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            warn!("EventReporter already started");
            return;
        }
        if *self.inner.shutdown_tx.borrow() {
            warn!("EventReporter already shut down, not starting");
            return;
        }
        *task = Some(tokio::spawn(self.clone().run()));
    }

    /// Send one pulse event if a connection is live.
    ///
    /// Never returns an error: failures are logged and reported through
    /// the returned [`Delivery`].
    pub async fn send(&self, event: PulseEvent) -> Delivery {
        let mut outbound = self.inner.outbound.lock().await;
        let Some(sink) = outbound.as_mut() else {
            warn!(
                delta = event.delta,
                detected_at = event.timestamp,
                "Not connected, pulse event dropped"
            );
            return Delivery::Dropped;
        };

        let timestamp = unix_now();
        let message = ReporterMessage::CoinInserted {
            delta: event.delta,
            timestamp,
        };
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize pulse event");
                return Delivery::Failed;
            }
        };

        match sink.send(Message::Text(payload)).await {
            Ok(()) => {
                info!(
                    delta = event.delta,
                    detected_at = event.timestamp,
                    timestamp,
                    "Pulse event sent"
                );
                Delivery::Sent
            }
            Err(e) => {
                warn!(
                    error = %e,
                    delta = event.delta,
                    detected_at = event.timestamp,
                    "Failed to send pulse event"
                );
                Delivery::Failed
            }
        }
    }

    /// Stop reconnecting, close the connection if open, and wait for the
    /// background task to finish. Safe to call repeatedly and before
    /// `start`.
    pub async fn shutdown(&self) {
        let was_shut_down = self.inner.shutdown_tx.send_replace(true);

        self.drop_connection().await;
        self.inner.state_tx.send_replace(ConnectionState::Closed);

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "EventReporter task ended abnormally");
            }
        }

        if !was_shut_down {
            info!("EventReporter shut down");
        }
    }

    /// Adapter that lets the pulse detector hand events to this reporter
    /// without blocking its notification thread.
    ///
    /// Events go through an unbounded channel to a single forwarding task
    /// spawned on `runtime`, so they are sent in submission order. The task
    /// ends once every clone of the returned sink is dropped.
    pub fn pulse_sink(&self, runtime: Handle) -> ReporterSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<PulseEvent>();
        let reporter = self.clone();
        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                reporter.send(event).await;
            }
            debug!("Pulse sink closed");
        });
        ReporterSink { tx }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Move to `state` unless the reporter has been closed.
    fn set_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn run(self) {
        let config = &self.inner.config;
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let mut attempt: u32 = 0;

        // Err means a process-level provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        info!(endpoint = %config.endpoint, "EventReporter started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                result = self.connect() => result,
            };

            match connected {
                Ok(source) => {
                    attempt = 0;
                    let result = self.serve(source, &mut shutdown_rx).await;
                    self.drop_connection().await;
                    match result {
                        Ok(()) => break,
                        Err(e) => warn!(error = %e, "Connection lost"),
                    }
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Connection attempt failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            attempt = attempt.saturating_add(1);
            let delay = reconnect_delay(attempt, config.reconnect_base, config.reconnect_max);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                _ = sleep(delay) => {}
            }
        }

        self.inner.state_tx.send_replace(ConnectionState::Closed);
        info!("EventReporter stopped");
    }

    /// Open a connection and install its write half.
    async fn connect(&self) -> Result<WsSource, ReporterError> {
        let config = &self.inner.config;
        let (stream, response) =
            timeout(config.connect_timeout, connect_async(config.endpoint.as_str()))
                .await
                .map_err(|_| ReporterError::ConnectTimeout(config.connect_timeout))??;

        let (sink, source) = stream.split();
        *self.inner.outbound.lock().await = Some(sink);
        self.set_state(ConnectionState::Connected);
        info!(
            endpoint = %config.endpoint,
            status = response.status().as_u16(),
            "Connection opened"
        );

        Ok(source)
    }

    /// Read inbound frames and run liveness probes until the connection
    /// fails (`Err`) or shutdown is requested (`Ok`).
    async fn serve(
        &self,
        mut source: WsSource,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), ReporterError> {
        let config = &self.inner.config;
        let mut ping_ticker = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => return Ok(()),

                _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                    return Err(ReporterError::LivenessTimeout(config.ping_timeout));
                }

                _ = ping_ticker.tick() => {
                    self.write_frame(Message::Ping(Vec::new())).await?;
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + config.ping_timeout);
                    }
                    trace!("Ping sent");
                }

                frame = source.next() => match frame {
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        trace!("Pong received");
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(message = %text, "Inbound message ignored");
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "Inbound binary message ignored");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Close frame received");
                        return Err(ReporterError::ClosedByPeer);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(ReporterError::ClosedByPeer),
                },
            }
        }
    }

    async fn write_frame(&self, message: Message) -> Result<(), ReporterError> {
        let mut outbound = self.inner.outbound.lock().await;
        let sink = outbound.as_mut().ok_or(ReporterError::NotConnected)?;
        sink.send(message).await?;
        Ok(())
    }

    /// Take the write half out from under the lock and close it.
    async fn drop_connection(&self) {
        let mut outbound = self.inner.outbound.lock().await;
        if let Some(mut sink) = outbound.take() {
            match timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("Connection closed"),
                Ok(Err(e)) => debug!(error = %e, "Error while closing connection"),
                Err(_) => debug!("Timed out closing connection"),
            }
        }
    }
}

/// [`PulseSink`] feeding the reporter's forwarding task.
#[derive(Clone)]
pub struct ReporterSink {
    tx: mpsc::UnboundedSender<PulseEvent>,
}

impl PulseSink for ReporterSink {
    fn submit(&self, event: PulseEvent) {
        if self.tx.send(event).is_err() {
            warn!(
                detected_at = event.timestamp,
                "Pulse forwarder stopped, pulse event dropped"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use url::Url;

    const WAIT: Duration = Duration::from_secs(5);

    type ServerStream = WebSocketStream<TcpStream>;

    async fn bind() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("ws://{addr}")).unwrap();
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerStream {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        accept_async(stream).await.unwrap()
    }

    fn test_config(endpoint: Url) -> ReporterConfig {
        ReporterConfig {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            reconnect_base: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(100),
            ..ReporterConfig::new(endpoint)
        }
    }

    async fn wait_for_state(reporter: &EventReporter, state: ConnectionState) {
        let mut rx = reporter.subscribe_state();
        timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    async fn next_message(ws: &mut ServerStream) -> ReporterMessage {
        loop {
            let frame = timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn timestamp_of(message: ReporterMessage) -> i64 {
        match message {
            ReporterMessage::CoinInserted { delta, timestamp } => {
                assert_eq!(delta, 1);
                timestamp
            }
        }
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped() {
        let reporter = EventReporter::new(ReporterConfig::new(
            Url::parse("ws://127.0.0.1:9").unwrap(),
        ));

        for _ in 0..5 {
            assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Dropped);
        }
        assert_eq!(reporter.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_live_connection_sends_one_frame_per_event() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        for _ in 0..3 {
            assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Sent);
        }

        let mut timestamps = Vec::new();
        for _ in 0..3 {
            timestamps.push(timestamp_of(next_message(&mut ws).await));
        }
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_produce_whole_frames() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        let sends: Vec<_> = (0..32)
            .map(|_| {
                let reporter = reporter.clone();
                tokio::spawn(async move { reporter.send(PulseEvent::now()).await })
            })
            .collect();
        for send in sends {
            assert_eq!(send.await.unwrap(), Delivery::Sent);
        }

        // Every frame parses on its own, and frame order matches stamp order.
        let mut timestamps = Vec::new();
        for _ in 0..32 {
            timestamps.push(timestamp_of(next_message(&mut ws).await));
        }
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_server_close() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut first = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;
        first.close(None).await.unwrap();

        let mut second = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        let before = unix_now();
        assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Sent);
        assert!(timestamp_of(next_message(&mut second).await) >= before);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_pong_triggers_reconnect() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(ReporterConfig {
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(50),
            ..test_config(url)
        });
        reporter.start();

        // Never read from this one, so pings go unanswered.
        let silent = accept(&listener).await;
        let _second = accept(&listener).await;
        drop(silent);

        reporter.shutdown().await;
        assert_eq!(reporter.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_closes_live_connection() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        reporter.shutdown().await;
        assert_eq!(reporter.state(), ConnectionState::Closed);

        let frame = timeout(WAIT, ws.next()).await.unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
        assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let reporter = EventReporter::new(ReporterConfig::new(
            Url::parse("ws://127.0.0.1:9").unwrap(),
        ));

        reporter.shutdown().await;
        reporter.shutdown().await;
        assert_eq!(reporter.state(), ConnectionState::Closed);

        // Start after shutdown is ignored.
        reporter.start();
        assert_eq!(reporter.state(), ConnectionState::Closed);
        assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_keeps_retrying() {
        // Bind then drop, so the port refuses connections for a while.
        let (listener, url) = bind().await;
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter = EventReporter::new(test_config(url));
        reporter.start();
        sleep(Duration::from_millis(300)).await;
        assert_ne!(reporter.state(), ConnectionState::Connected);

        let listener = TcpListener::bind(addr).await.unwrap();
        let _ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        reporter.shutdown().await;
        assert_eq!(reporter.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_pulse_sink_forwards_to_connection() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        let before = unix_now();
        let sink = reporter.pulse_sink(Handle::current());
        sink.submit(PulseEvent::now());
        assert!(timestamp_of(next_message(&mut ws).await) >= before);

        reporter.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pulse_sink_keeps_order_on_multi_thread_runtime() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let mut ws = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        // Submit from a plain thread, like the line's notification thread.
        let sink = reporter.pulse_sink(Handle::current());
        let producer = std::thread::spawn(move || {
            for i in 0..200 {
                sink.submit(PulseEvent::at(i));
            }
        });
        tokio::task::spawn_blocking(move || producer.join())
            .await
            .unwrap()
            .unwrap();

        let mut timestamps = Vec::new();
        for _ in 0..200 {
            timestamps.push(timestamp_of(next_message(&mut ws).await));
        }
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_tls_handshake_failure_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = Url::parse(&format!("wss://localhost:{port}")).unwrap();

        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        // Plain TCP on the other end: every TLS handshake fails, and the
        // reporter must come back for another attempt.
        for _ in 0..2 {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            drop(stream);
        }
        assert_ne!(reporter.state(), ConnectionState::Connected);

        reporter.shutdown().await;
        assert_eq!(reporter.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_and_connection_recovers() {
        let (listener, url) = bind().await;
        let reporter = EventReporter::new(test_config(url));
        reporter.start();

        let first = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;

        // Close the write half underneath the reporter so the next write errors.
        {
            let mut outbound = reporter.inner.outbound.lock().await;
            outbound.as_mut().unwrap().close().await.unwrap();
        }
        assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Failed);

        // Server goes away without a closing handshake.
        drop(first);

        let mut second = accept(&listener).await;
        wait_for_state(&reporter, ConnectionState::Connected).await;
        assert_eq!(reporter.send(PulseEvent::now()).await, Delivery::Sent);
        timestamp_of(next_message(&mut second).await);

        reporter.shutdown().await;
    }
}
