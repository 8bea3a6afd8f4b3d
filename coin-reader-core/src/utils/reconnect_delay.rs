use std::time::Duration;

/// Returns the delay before reconnect attempt `attempt` (1-based).
///
/// Doubles from `base` on every attempt and saturates at `max`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let shift = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << shift).min(max)
}
