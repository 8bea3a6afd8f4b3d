//! Event type definitions.

/// One recognized coin pulse.
///
/// Created when the line transitions into the pulse level and consumed
/// immediately by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Coins accounted for by this event. Always `1`.
    pub delta: u32,
    /// Unix timestamp (seconds) at detection time. The wire message
    /// carries the send time instead.
    pub timestamp: i64,
}

impl PulseEvent {
    /// A single-coin event stamped with the current time.
    pub fn now() -> Self {
        Self::at(unix_now())
    }

    /// A single-coin event with an explicit timestamp.
    pub fn at(timestamp: i64) -> Self {
        Self {
            delta: 1,
            timestamp,
        }
    }
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Receiver of detected pulses.
///
/// `submit` is called from the line's notification thread and must
/// return without blocking.
pub trait PulseSink: Send + Sync {
    fn submit(&self, event: PulseEvent);
}

impl<F> PulseSink for F
where
    F: Fn(PulseEvent) + Send + Sync,
{
    fn submit(&self, event: PulseEvent) {
        self(event)
    }
}
