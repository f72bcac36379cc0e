// Licensed under the Apache-2.0 license

//! Common types and constants for the bit-banged I2C modules.
//!
//! This module provides the bus configuration, the protocol vocabulary shared
//! by master and slave (direction, acknowledge bit, slave events) and the
//! acknowledge sampling policy.

use crate::common::{from_micros, from_millis, Duration};
use core::fmt;
use fugit::{MicrosDurationU32, MillisDurationU32};

/// GPIO line carrying the data signal on the reference wiring.
pub const DEFAULT_DATA_PIN: u32 = 22;
/// GPIO line carrying the clock signal on the reference wiring.
pub const DEFAULT_CLOCK_PIN: u32 = 23;
/// Address the emulated range sensor answers to.
pub const DEFAULT_OWN_ADDRESS: u8 = 0x29;
/// Default bit period. Slow on purpose so a user-space slave can keep up.
pub const DEFAULT_BIT_PERIOD: MicrosDurationU32 = MicrosDurationU32::micros(2_000);
/// Longest a slave waits for the next clock edge inside a transaction.
pub const DEFAULT_EDGE_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(10);
/// Longest a polling slave waits for an idle bus or a START.
pub const DEFAULT_LISTEN_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(100);
/// Idle checks the master makes before giving up on a START.
pub const DEFAULT_START_RETRIES: u8 = 3;
/// Sampling period of the edge-triggered slave.
pub const DEFAULT_TICK: MicrosDurationU32 = MicrosDurationU32::micros(1);

/// Highest 7-bit address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Transfer direction, as carried in the R/W bit of the address byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Master sends, slave receives (R/W bit 0).
    Write,
    /// Slave sends, master receives (R/W bit 1).
    Read,
}

impl Direction {
    #[must_use]
    pub fn from_rw_bit(bit: bool) -> Self {
        if bit {
            Self::Read
        } else {
            Self::Write
        }
    }

    #[must_use]
    pub fn rw_bit(self) -> u8 {
        match self {
            Self::Write => 0,
            Self::Read => 1,
        }
    }

    /// Address byte as it goes on the wire: `address << 1 | rw`.
    #[must_use]
    pub fn address_byte(self, address: u8) -> u8 {
        (address << 1) | self.rw_bit()
    }
}

/// Ninth bit of every byte. Low means acknowledged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AckBit {
    Ack,
    Nack,
}

impl AckBit {
    /// Decodes a sampled data level.
    #[must_use]
    pub fn from_level(high: bool) -> Self {
        if high {
            Self::Nack
        } else {
            Self::Ack
        }
    }

    /// Level to put on the data line.
    #[must_use]
    pub fn level(self) -> bool {
        matches!(self, Self::Nack)
    }

    #[must_use]
    pub fn is_ack(self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// How the acknowledge bit is sampled while the clock is high.
///
/// A single read is at the mercy of scheduling jitter on the peer, so the
/// default takes three reads and calls it an ACK when at least two were low.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AckSampling {
    samples: u8,
}

impl Default for AckSampling {
    fn default() -> Self {
        Self::majority(3)
    }
}

impl AckSampling {
    /// Majority vote over `samples` reads spaced one microsecond apart.
    #[must_use]
    pub const fn majority(samples: u8) -> Self {
        Self { samples }
    }

    /// One read, no debouncing.
    #[must_use]
    pub const fn single() -> Self {
        Self { samples: 1 }
    }

    #[must_use]
    pub fn samples(self) -> u8 {
        self.samples
    }

    /// Low reads needed to call the bit an ACK.
    #[must_use]
    pub fn threshold(self) -> u8 {
        self.samples / 2 + 1
    }

    #[must_use]
    pub fn decide(self, low_reads: u8) -> AckBit {
        if low_reads >= self.threshold() {
            AckBit::Ack
        } else {
            AckBit::Nack
        }
    }
}

/// Slave implementation selected by [`BusConfig::strategy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveStrategy {
    /// Blocking state machine that waits for each expected edge in turn.
    Polling,
    /// Sample both lines every tick and react to classified edges.
    EdgeTriggered,
}

/// Line transition seen by the edge-triggered slave between two samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveEvent {
    /// SDA fell while SCL stayed high.
    Start,
    /// SDA rose while SCL stayed high.
    Stop,
    /// SCL rose.
    ClockRisingEdge,
    /// SCL fell.
    ClockFallingEdge,
}

impl SlaveEvent {
    /// Classifies the change from `prev` to `now`, both `(scl, sda)` levels.
    ///
    /// START and STOP take precedence; a simultaneous change of both lines is
    /// reported as the clock edge.
    #[must_use]
    pub fn classify(prev: (bool, bool), now: (bool, bool)) -> Option<Self> {
        let ((prev_scl, prev_sda), (scl, sda)) = (prev, now);
        match (prev_scl, scl) {
            (true, true) if prev_sda && !sda => Some(Self::Start),
            (true, true) if !prev_sda && sda => Some(Self::Stop),
            (false, true) => Some(Self::ClockRisingEdge),
            (true, false) => Some(Self::ClockFallingEdge),
            _ => None,
        }
    }
}

/// Rejected [`BusConfigBuilder`] settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Own address does not fit in seven bits.
    InvalidAddress(u8),
    /// Bit period of zero microseconds.
    ZeroBitPeriod,
    /// Edge or listen timeout of zero.
    ZeroTimeout,
    /// Edge timeout not above three bit periods, or listen timeout below the
    /// edge timeout. A slave would give up inside a single clock phase.
    TimeoutTooShort,
    /// Acknowledge sampling with no reads.
    NoAckSamples,
    /// Edge-triggered tick of zero.
    ZeroTick,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(address) => {
                write!(f, "address {address:#04x} is not a 7-bit address")
            }
            Self::ZeroBitPeriod => f.write_str("bit period must be non-zero"),
            Self::ZeroTimeout => f.write_str("timeouts must be non-zero"),
            Self::TimeoutTooShort => f.write_str(
                "edge timeout must exceed three bit periods and listen timeout the edge timeout",
            ),
            Self::NoAckSamples => f.write_str("ack sampling needs at least one read"),
            Self::ZeroTick => f.write_str("slave tick must be non-zero"),
        }
    }
}

/// Validated bus configuration. Build with [`BusConfigBuilder`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Host GPIO line for SDA, used by [`claim_lines`](crate::i2c::line::claim_lines).
    pub data_pin: u32,
    /// Host GPIO line for SCL.
    pub clock_pin: u32,
    pub own_address: u8,
    pub bit_period: MicrosDurationU32,
    pub edge_timeout: MillisDurationU32,
    pub listen_timeout: MillisDurationU32,
    pub start_retries: u8,
    pub ack_sampling: AckSampling,
    pub strategy: SlaveStrategy,
    pub tick: MicrosDurationU32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            data_pin: DEFAULT_DATA_PIN,
            clock_pin: DEFAULT_CLOCK_PIN,
            own_address: DEFAULT_OWN_ADDRESS,
            bit_period: DEFAULT_BIT_PERIOD,
            edge_timeout: DEFAULT_EDGE_TIMEOUT,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            start_retries: DEFAULT_START_RETRIES,
            ack_sampling: AckSampling::default(),
            strategy: SlaveStrategy::Polling,
            tick: DEFAULT_TICK,
        }
    }
}

impl BusConfig {
    /// Bit period in microseconds.
    #[must_use]
    pub fn period_us(&self) -> u32 {
        self.bit_period.ticks()
    }

    /// Interval between line reads while waiting for an edge: a tenth of
    /// the bit period, at least one microsecond.
    #[must_use]
    pub fn poll_interval_us(&self) -> u32 {
        (self.bit_period.ticks() / 10).max(1)
    }

    #[must_use]
    pub fn edge_timeout(&self) -> Duration {
        from_millis(self.edge_timeout)
    }

    #[must_use]
    pub fn listen_timeout(&self) -> Duration {
        from_millis(self.listen_timeout)
    }

    #[must_use]
    pub fn tick(&self) -> Duration {
        from_micros(self.tick)
    }
}

pub struct BusConfigBuilder {
    config: BusConfig,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
        }
    }
    #[must_use]
    pub fn data_pin(mut self, pin: u32) -> Self {
        self.config.data_pin = pin;
        self
    }
    #[must_use]
    pub fn clock_pin(mut self, pin: u32) -> Self {
        self.config.clock_pin = pin;
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: u8) -> Self {
        self.config.own_address = address;
        self
    }
    #[must_use]
    pub fn bit_period(mut self, period: MicrosDurationU32) -> Self {
        self.config.bit_period = period;
        self
    }
    #[must_use]
    pub fn edge_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.config.edge_timeout = timeout;
        self
    }
    #[must_use]
    pub fn listen_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.config.listen_timeout = timeout;
        self
    }
    #[must_use]
    pub fn start_retries(mut self, retries: u8) -> Self {
        self.config.start_retries = retries;
        self
    }
    #[must_use]
    pub fn ack_sampling(mut self, sampling: AckSampling) -> Self {
        self.config.ack_sampling = sampling;
        self
    }
    #[must_use]
    pub fn strategy(mut self, strategy: SlaveStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }
    #[must_use]
    pub fn tick(mut self, tick: MicrosDurationU32) -> Self {
        self.config.tick = tick;
        self
    }

    /// Checks the settings and produces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for an address wider than seven bits,
    /// a zero bit period, tick or timeout, timeouts too short for the bit
    /// period, or ACK sampling with no reads.
    pub fn build(self) -> Result<BusConfig, ConfigurationError> {
        let config = self.config;
        if config.own_address > MAX_ADDRESS {
            return Err(ConfigurationError::InvalidAddress(config.own_address));
        }
        if config.bit_period.ticks() == 0 {
            return Err(ConfigurationError::ZeroBitPeriod);
        }
        if config.edge_timeout.ticks() == 0 || config.listen_timeout.ticks() == 0 {
            return Err(ConfigurationError::ZeroTimeout);
        }
        let edge_us = u64::from(config.edge_timeout.ticks()) * 1_000;
        if edge_us <= 3 * u64::from(config.bit_period.ticks())
            || config.listen_timeout < config.edge_timeout
        {
            return Err(ConfigurationError::TimeoutTooShort);
        }
        if config.ack_sampling.samples() == 0 {
            return Err(ConfigurationError::NoAckSamples);
        }
        if config.tick.ticks() == 0 {
            return Err(ConfigurationError::ZeroTick);
        }
        Ok(config)
    }
}
