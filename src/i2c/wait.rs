// Licensed under the Apache-2.0 license

//! Deadline-bounded polling shared by every blocking wait on the bus.

use crate::common::{Clock, Duration};
use crate::i2c::error::Error;
use embedded_hal::delay::DelayNs;

/// Polls `ready` every `interval_us` until it yields a value or `timeout`
/// has elapsed on `clock`.
///
/// `ready` is always evaluated at least once, and once more after the
/// deadline, so a condition that is already true never times out.
pub(crate) fn until<C, D, T, E, F>(
    clock: &mut C,
    delay: &mut D,
    timeout: Duration,
    interval_us: u32,
    mut ready: F,
) -> Result<T, Error<E>>
where
    C: Clock,
    D: DelayNs,
    F: FnMut() -> Result<Option<T>, E>,
{
    let deadline = clock.now() + timeout;
    loop {
        if let Some(value) = ready().map_err(Error::Line)? {
            return Ok(value);
        }
        if clock.now() >= deadline {
            return match ready().map_err(Error::Line)? {
                Some(value) => Ok(value),
                None => Err(Error::Timeout),
            };
        }
        delay.delay_us(interval_us);
    }
}

/// [`until`] for a plain boolean condition.
pub(crate) fn until_true<C, D, E, F>(
    clock: &mut C,
    delay: &mut D,
    timeout: Duration,
    interval_us: u32,
    mut ready: F,
) -> Result<(), Error<E>>
where
    C: Clock,
    D: DelayNs,
    F: FnMut() -> Result<bool, E>,
{
    until(clock, delay, timeout, interval_us, || {
        ready().map(|done| done.then_some(()))
    })
}
