// Licensed under the Apache-2.0 license

//! Stuck-bus recovery and retrying of master operations.
//!
//! A slave that lost track of the clock mid-byte keeps SDA low until it has
//! seen the rest of its bits. Up to nine clock pulses walk it out of the byte,
//! after which a STOP returns the bus to idle.

use crate::i2c::error::Error;
use crate::i2c::i2c_controller::I2cController;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use fugit::MicrosDurationU32;
use log::{info, warn};

/// Clock pulses issued at most by [`I2cController::recover_bus`].
pub const RECOVERY_PULSES: u8 = 9;

/// Outcome of a bus recovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    /// Clock pulses issued.
    pub pulses: u8,
    /// SDA read high after the last pulse.
    pub released: bool,
}

impl<SCL, SDA, D, E> I2cController<SCL, SDA, D>
where
    SCL: InputPin<Error = E> + OutputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
{
    /// Pulses SCL until SDA reads high or [`RECOVERY_PULSES`] are spent, then
    /// emits STOP and waits two bit periods.
    ///
    /// The STOP is sent whether or not SDA came free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be read or driven.
    pub fn recover_bus(&mut self) -> Result<Recovery, Error<E>> {
        self.sda.release()?;
        let mut recovery = Recovery {
            pulses: 0,
            released: false,
        };
        while recovery.pulses < RECOVERY_PULSES {
            self.scl.set_low()?;
            self.settle(1);
            self.scl.set_high()?;
            self.settle(1);
            recovery.pulses += 1;
            if self.sda.is_high()? {
                recovery.released = true;
                break;
            }
        }
        self.generate_stop()?;
        self.settle(2);
        if recovery.released {
            info!("i2c: bus recovered after {} pulses", recovery.pulses);
        } else {
            warn!("i2c: SDA still held low after {} pulses", recovery.pulses);
        }
        Ok(recovery)
    }

    pub(crate) fn pause(&mut self, duration: MicrosDurationU32) {
        self.delay.delay_us(duration.ticks());
    }
}

/// How [`retry`] repeats a failing operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub attempts: u8,
    /// Wait between tries.
    pub backoff: MicrosDurationU32,
    /// Consecutive failures after which the bus is recovered before the next
    /// try. Zero disables recovery.
    pub recover_after: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: MicrosDurationU32::micros(1_400),
            recover_after: 2,
        }
    }
}

/// Runs `operation` until it succeeds or `policy.attempts` are used up.
///
/// NACKs and timeouts are retried; line faults and invalid addresses are
/// returned immediately.
///
/// # Errors
///
/// The error of the last attempt.
pub fn retry<SCL, SDA, D, E, T, F>(
    controller: &mut I2cController<SCL, SDA, D>,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, Error<E>>
where
    SCL: InputPin<Error = E> + OutputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    F: FnMut(&mut I2cController<SCL, SDA, D>) -> Result<T, Error<E>>,
{
    let mut failures = 0u8;
    let mut attempt = 1u8;
    loop {
        let error = match operation(controller) {
            Ok(value) => return Ok(value),
            Err(error) if error.is_line_fault() => return Err(error),
            Err(error @ Error::InvalidAddress(_)) => return Err(error),
            Err(error) => error,
        };
        if attempt >= policy.attempts {
            return Err(error);
        }
        failures += 1;
        if policy.recover_after > 0 && failures >= policy.recover_after {
            warn!("i2c: {failures} consecutive failures, recovering bus");
            controller.recover_bus()?;
            failures = 0;
        }
        controller.pause(policy.backoff);
        attempt += 1;
    }
}
