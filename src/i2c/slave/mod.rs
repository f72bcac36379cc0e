// Licensed under the Apache-2.0 license

//! Bit-banged I2C slave.
//!
//! Two engines implement [`SlaveEngine`]:
//!
//! - [`PollingSlave`]: waits for each expected edge with a bounded poll.
//!   Simple to follow, but blind to the bus while it is inside a wait.
//! - [`EdgeSlave`]: samples both lines every tick and advances an explicit
//!   state machine. Never blocks, and catches START/STOP at any point.
//!
//! [`Slave`] picks one from [`BusConfig::strategy`] and [`run`] drives any
//! engine against a [`RegisterTarget`] until asked to stop.

pub mod edge;
pub mod polling;

pub use edge::EdgeSlave;
pub use polling::{Listen, PollingSlave, SlaveByte};

use crate::common::{Clock, Instant};
use crate::i2c::common::{BusConfig, SlaveStrategy};
use crate::i2c::error::Error;
use crate::i2c::traits::{Activity, RegisterTarget, SlaveEngine};
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{info, trace};

/// Slave engine chosen at runtime.
pub enum Slave<SCL, SDA, D, C> {
    Polling(PollingSlave<SCL, SDA, D, C>),
    EdgeTriggered(EdgeSlave<SCL, SDA, D, C>),
}

impl<SCL, SDA, D, C, E> Slave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    /// Builds the engine named by `config.strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if the lines cannot be set up.
    pub fn new(scl: SCL, sda: SDA, delay: D, clock: C, config: BusConfig) -> Result<Self, Error<E>> {
        Ok(match config.strategy {
            SlaveStrategy::Polling => {
                Self::Polling(PollingSlave::new(scl, sda, delay, clock, config)?)
            }
            SlaveStrategy::EdgeTriggered => {
                Self::EdgeTriggered(EdgeSlave::new(scl, sda, delay, clock, config)?)
            }
        })
    }

    #[must_use]
    pub fn strategy(&self) -> SlaveStrategy {
        match self {
            Self::Polling(_) => SlaveStrategy::Polling,
            Self::EdgeTriggered(_) => SlaveStrategy::EdgeTriggered,
        }
    }

    /// Returns the pins and time sources.
    pub fn free(self) -> (SCL, SDA, D, C) {
        match self {
            Self::Polling(slave) => slave.free(),
            Self::EdgeTriggered(slave) => slave.free(),
        }
    }
}

impl<SCL, SDA, D, C, E> SlaveEngine for Slave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    type LineError = E;

    fn now(&mut self) -> Instant {
        match self {
            Self::Polling(slave) => slave.now(),
            Self::EdgeTriggered(slave) => slave.now(),
        }
    }

    fn service<T: RegisterTarget>(&mut self, target: &mut T) -> Result<Activity, Error<E>> {
        match self {
            Self::Polling(slave) => slave.service(target),
            Self::EdgeTriggered(slave) => slave.service(target),
        }
    }
}

/// Services `engine` against `target` until `shutdown` is set.
///
/// Each iteration first hands the current time to the target, then does one
/// unit of bus work. Timeouts and NACKs are part of normal operation and keep
/// the loop going.
///
/// # Errors
///
/// Returns the first [`Error::Line`] fault.
pub fn run<S, T>(engine: &mut S, target: &mut T, shutdown: &AtomicBool) -> Result<(), Error<S::LineError>>
where
    S: SlaveEngine,
    T: RegisterTarget,
{
    info!("i2c slave: serving");
    while !shutdown.load(Ordering::Acquire) {
        target.advance_time(engine.now());
        match engine.service(target) {
            Ok(_) => {}
            Err(error) if error.is_line_fault() => return Err(error),
            Err(Error::Timeout) => trace!("i2c slave: bus quiet"),
            Err(_) => {}
        }
    }
    info!("i2c slave: stopped");
    Ok(())
}
