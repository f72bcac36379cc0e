// Licensed under the Apache-2.0 license

//! Time sources shared by the slave engines and the sensor emulator.
//!
//! Every bounded wait in this crate is expressed as a deadline against a
//! [`Clock`], never as an iteration count, so that the bounds hold no matter
//! how the host schedules the polling loop.

use fugit::{MicrosDurationU32, MicrosDurationU64, MillisDurationU32, TimerInstantU64};

/// Monotonic timestamp with microsecond resolution.
pub type Instant = TimerInstantU64<1_000_000>;

/// Span between two [`Instant`]s.
pub type Duration = MicrosDurationU64;

/// Monotonic time source.
pub trait Clock {
    /// Current time. Must never go backwards.
    fn now(&mut self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now(&mut self) -> Instant {
        (**self).now()
    }
}

/// Widens a microsecond configuration value to a clock [`Duration`].
#[must_use]
pub fn from_micros(duration: MicrosDurationU32) -> Duration {
    Duration::micros(u64::from(duration.ticks()))
}

/// Widens a millisecond configuration value to a clock [`Duration`].
#[must_use]
pub fn from_millis(duration: MillisDurationU32) -> Duration {
    Duration::micros(u64::from(duration.ticks()) * 1_000)
}

#[cfg(feature = "std")]
pub use self::host::{StdClock, StdDelay};

#[cfg(feature = "std")]
mod host {
    use super::{Clock, Instant};
    use embedded_hal::delay::DelayNs;

    /// [`Clock`] backed by `std::time::Instant`, counting from construction.
    #[derive(Debug, Clone, Copy)]
    pub struct StdClock {
        origin: std::time::Instant,
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StdClock {
        #[must_use]
        pub fn new() -> Self {
            Self {
                origin: std::time::Instant::now(),
            }
        }
    }

    impl Clock for StdClock {
        fn now(&mut self) -> Instant {
            let micros = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
            Instant::from_ticks(micros)
        }
    }

    /// Thread-sleeping delay. Accuracy is whatever the host scheduler gives.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct StdDelay;

    impl DelayNs for StdDelay {
        fn delay_ns(&mut self, ns: u32) {
            std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_widening() {
        assert_eq!(from_micros(MicrosDurationU32::micros(2_000)).ticks(), 2_000);
        assert_eq!(from_millis(MillisDurationU32::millis(75)).ticks(), 75_000);
    }

    #[test]
    fn test_instant_arithmetic() {
        let start = Instant::from_ticks(1_000);
        let later = start + from_millis(MillisDurationU32::millis(10));
        assert_eq!(later.ticks(), 11_000);
        assert!(later > start);
        assert_eq!((later - start).ticks(), 10_000);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_std_delay_advances_std_clock() {
        use embedded_hal::delay::DelayNs;

        let mut clock = StdClock::new();
        let mut delay = StdDelay;
        let before = clock.now();
        delay.delay_ms(2);
        let after = clock.now();
        assert!(after >= before + from_millis(MillisDurationU32::millis(2)));

        // Borrowed clocks read the same source.
        fn read<C: Clock>(mut clock: C) -> Instant {
            clock.now()
        }
        assert!(read(&mut clock) >= after);
    }
}
