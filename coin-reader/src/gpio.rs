//! Hardware input line selection.
//!
//! With the `rpi` feature the daemon drives a Raspberry Pi GPIO pin
//! through `rppal`. Without it, [`open_line`] returns a line that refuses
//! every claim, so the daemon fails at startup with a clear error.

use coin_reader_core::line::{Bias, EdgeCallback, HardwareError, InputLine, Level};
use std::time::Duration;

/// Open the input line backend this binary was built with.
pub fn open_line() -> Box<dyn InputLine> {
    #[cfg(feature = "rpi")]
    {
        Box::new(rpi::RpiLine::new())
    }
    #[cfg(not(feature = "rpi"))]
    {
        Box::new(UnsupportedLine)
    }
}

/// Line used when no GPIO backend is compiled in.
#[cfg_attr(feature = "rpi", allow(dead_code))]
pub struct UnsupportedLine;

impl InputLine for UnsupportedLine {
    fn claim(&mut self, pin: u8, _bias: Bias) -> Result<Level, HardwareError> {
        Err(HardwareError::LineUnavailable {
            pin,
            reason: "built without the `rpi` feature".to_string(),
        })
    }

    fn watch(&mut self, _debounce: Duration, _callback: EdgeCallback) -> Result<(), HardwareError> {
        Err(HardwareError::NotClaimed)
    }

    fn release(&mut self) {}
}

#[cfg(feature = "rpi")]
mod rpi {
    use super::*;
    use rppal::gpio::{Event, Gpio, InputPin, Trigger};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

    /// BCM GPIO pin driven by `rppal`.
    ///
    /// Edge notifications arrive on rppal's interrupt thread with the
    /// kernel debounce applied. The callback samples the pin itself; the
    /// pin sits behind a mutex so it can be read from that thread.
    #[derive(Default)]
    pub struct RpiLine {
        pin: Option<Arc<Mutex<InputPin>>>,
    }

    impl RpiLine {
        pub fn new() -> Self {
            Self { pin: None }
        }
    }

    fn lock(pin: &Mutex<InputPin>) -> MutexGuard<'_, InputPin> {
        pin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn to_level(level: rppal::gpio::Level) -> Level {
        match level {
            rppal::gpio::Level::High => Level::High,
            rppal::gpio::Level::Low => Level::Low,
        }
    }

    /// Level the line settles at after an edge of kind `trigger`.
    pub(super) fn level_after(trigger: Trigger) -> Option<Level> {
        match trigger {
            Trigger::RisingEdge => Some(Level::High),
            Trigger::FallingEdge => Some(Level::Low),
            _ => None,
        }
    }

    /// Current level of the pin, as seen from the interrupt thread.
    ///
    /// Never blocks: `watch` and `release` hold the lock while they talk
    /// to the interrupt thread, and `release` joins it. While the lock is
    /// taken the edge direction stands in for a reading.
    fn sample(pin: &Weak<Mutex<InputPin>>, event: &Event) -> Option<Level> {
        match pin.upgrade().as_deref().map(Mutex::try_lock) {
            Some(Ok(input)) => Some(to_level(input.read())),
            _ => level_after(event.trigger),
        }
    }

    impl InputLine for RpiLine {
        fn claim(&mut self, pin: u8, bias: Bias) -> Result<Level, HardwareError> {
            if self.pin.is_some() {
                return Err(HardwareError::LineUnavailable {
                    pin,
                    reason: "line already claimed".to_string(),
                });
            }

            let unavailable = |e: rppal::gpio::Error| HardwareError::LineUnavailable {
                pin,
                reason: e.to_string(),
            };
            let gpio = Gpio::new().map_err(unavailable)?;
            let raw = gpio.get(pin).map_err(unavailable)?;
            let input = match bias {
                Bias::PullUp => raw.into_input_pullup(),
                Bias::PullDown => raw.into_input_pulldown(),
                Bias::Floating => raw.into_input(),
            };

            let level = to_level(input.read());
            self.pin = Some(Arc::new(Mutex::new(input)));
            Ok(level)
        }

        fn watch(
            &mut self,
            debounce: Duration,
            mut callback: EdgeCallback,
        ) -> Result<(), HardwareError> {
            let shared = self.pin.as_ref().ok_or(HardwareError::NotClaimed)?;
            // Weak, so the interrupt thread does not keep the pin alive.
            let reader = Arc::downgrade(shared);
            let mut input = lock(shared);
            let pin = input.pin();

            input
                .set_async_interrupt(Trigger::Both, Some(debounce), move |event: Event| {
                    match sample(&reader, &event) {
                        Some(level) => callback(level),
                        None => {
                            tracing::trace!(trigger = ?event.trigger, "Unexpected interrupt trigger");
                        }
                    }
                })
                .map_err(|e| HardwareError::WatchFailed {
                    pin,
                    reason: e.to_string(),
                })
        }

        fn release(&mut self) {
            if let Some(shared) = self.pin.take() {
                let mut input = lock(&shared);
                if let Err(e) = input.clear_async_interrupt() {
                    tracing::warn!(pin = input.pin(), error = %e, "Failed to clear interrupt");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_line_refuses_claim() {
        let mut line = UnsupportedLine;
        let err = line.claim(2, Bias::PullUp).unwrap_err();
        assert!(matches!(err, HardwareError::LineUnavailable { pin: 2, .. }));
        line.release();
    }

    #[cfg(feature = "rpi")]
    #[test]
    fn test_edge_direction_maps_to_level() {
        use rppal::gpio::Trigger;

        assert_eq!(rpi::level_after(Trigger::RisingEdge), Some(Level::High));
        assert_eq!(rpi::level_after(Trigger::FallingEdge), Some(Level::Low));
        assert_eq!(rpi::level_after(Trigger::Both), None);
    }
}
