// Licensed under the Apache-2.0 license

//! Blocking slave that walks the protocol one expected edge at a time.
//!
//! Every wait is bounded: `listen_timeout` while waiting for the bus to go
//! idle or for a START, `edge_timeout` for each clock edge inside a
//! transaction. On any timeout the data line is back in the released state
//! before the error is returned.

use crate::common::{Clock, Duration, Instant};
use crate::i2c::common::{AckBit, BusConfig, Direction};
use crate::i2c::error::Error;
use crate::i2c::line::OpenDrain;
use crate::i2c::traits::{Activity, RegisterTarget, SlaveEngine, Transaction};
use crate::i2c::wait;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, trace};

/// Outcome of address matching.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Listen {
    /// Address matched and was acknowledged.
    Addressed(Direction),
    /// Another device was addressed. SDA was never driven.
    NotAddressed,
}

/// Result of reading a byte while watching for bus conditions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveByte {
    /// A full byte, already acknowledged.
    Data(u8),
    /// STOP arrived instead of a byte.
    Stop,
    /// Repeated START arrived instead of a byte.
    Start,
}

/// How the clock-high phase of a bit ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum HighPhase {
    ClockFell,
    DataRose,
    DataFell,
}

/// How a transaction segment ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum End {
    Stop,
    RepeatedStart,
}

/// Clock line plus the time sources used to wait on it.
struct ClockWatch<SCL, D, C> {
    scl: SCL,
    delay: D,
    clock: C,
    interval_us: u32,
}

impl<SCL, D, C, E> ClockWatch<SCL, D, C>
where
    SCL: InputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    fn level(&mut self, high: bool, timeout: Duration) -> Result<(), Error<E>> {
        let scl = &mut self.scl;
        wait::until_true(&mut self.clock, &mut self.delay, timeout, self.interval_us, || {
            scl.is_high().map(|level| level == high)
        })
    }

    /// Waits until SCL and SDA read `scl_high` and `sda_high` together.
    fn both<SDA>(
        &mut self,
        sda: &mut OpenDrain<SDA>,
        scl_high: bool,
        sda_high: bool,
        timeout: Duration,
    ) -> Result<(), Error<E>>
    where
        SDA: InputPin<Error = E> + OutputPin<Error = E>,
    {
        let scl = &mut self.scl;
        wait::until_true(&mut self.clock, &mut self.delay, timeout, self.interval_us, || {
            let data = sda.is_high()?;
            Ok(data == sda_high && scl.is_high()? == scl_high)
        })
    }

    /// Watches SDA while SCL is high, starting from the sampled `level`.
    ///
    /// SDA is read before SCL so that a data change made right after the
    /// clock fell is never mistaken for a START or STOP.
    fn high_phase<SDA>(
        &mut self,
        sda: &mut OpenDrain<SDA>,
        level: bool,
        timeout: Duration,
    ) -> Result<HighPhase, Error<E>>
    where
        SDA: InputPin<Error = E> + OutputPin<Error = E>,
    {
        let scl = &mut self.scl;
        wait::until(&mut self.clock, &mut self.delay, timeout, self.interval_us, || {
            let data = sda.is_high()?;
            if !scl.is_high()? {
                return Ok(Some(HighPhase::ClockFell));
            }
            Ok(match (level, data) {
                (false, true) => Some(HighPhase::DataRose),
                (true, false) => Some(HighPhase::DataFell),
                _ => None,
            })
        })
    }
}

/// Slave that blocks on each protocol step.
pub struct PollingSlave<SCL, SDA, D, C> {
    watch: ClockWatch<SCL, D, C>,
    sda: OpenDrain<SDA>,
    config: BusConfig,
}

impl<SCL, SDA, D, C, E> PollingSlave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    /// Takes the lines and releases SDA. SCL is only ever read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if SDA cannot be released.
    pub fn new(scl: SCL, sda: SDA, delay: D, clock: C, config: BusConfig) -> Result<Self, Error<E>> {
        Ok(Self {
            watch: ClockWatch {
                scl,
                delay,
                clock,
                interval_us: config.poll_interval_us(),
            },
            sda: OpenDrain::new(sda)?,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Applies new settings from the next transaction on.
    pub fn set_config(&mut self, config: BusConfig) {
        self.watch.interval_us = config.poll_interval_us();
        self.config = config;
    }

    /// Returns the pins and time sources.
    pub fn free(self) -> (SCL, SDA, D, C) {
        let ClockWatch {
            scl, delay, clock, ..
        } = self.watch;
        (scl, self.sda.free(), delay, clock)
    }

    /// Waits for an idle bus and a START, then matches the address byte.
    ///
    /// A START is only taken when SDA falls while SCL stays high after the
    /// idle check; a clock pulse in between restarts the search.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if no START arrives within `listen_timeout`.
    pub fn listen(&mut self) -> Result<Listen, Error<E>> {
        let deadline = self.watch.clock.now() + self.config.listen_timeout();
        loop {
            let remaining = self.remaining(deadline)?;
            self.watch.both(&mut self.sda, true, true, remaining)?;
            let remaining = self.remaining(deadline)?;
            let scl = &mut self.watch.scl;
            let sda = &mut self.sda;
            let started = wait::until(
                &mut self.watch.clock,
                &mut self.watch.delay,
                remaining,
                self.watch.interval_us,
                || {
                    let data = sda.is_high()?;
                    if !scl.is_high()? {
                        return Ok(Some(false));
                    }
                    Ok((!data).then_some(true))
                },
            )?;
            if started {
                trace!("i2c slave: START");
                return self.match_address();
            }
        }
    }

    fn remaining(&mut self, deadline: Instant) -> Result<Duration, Error<E>> {
        deadline
            .checked_duration_since(self.watch.clock.now())
            .ok_or(Error::Timeout)
    }

    /// Reads the address byte that follows a START and acknowledges it if it
    /// carries our address.
    fn match_address(&mut self) -> Result<Listen, Error<E>> {
        let edge = self.config.edge_timeout();
        self.watch.level(false, edge)?;
        let byte = self.read_bits()?;
        let address = byte >> 1;
        let direction = Direction::from_rw_bit(byte & 1 != 0);
        if address != self.config.own_address {
            trace!("i2c slave: {address:#04x} is not us");
            return Ok(Listen::NotAddressed);
        }
        self.send_ack(AckBit::Ack)?;
        debug!("i2c slave: addressed for {direction:?}");
        Ok(Listen::Addressed(direction))
    }

    fn read_bits(&mut self) -> Result<u8, Error<E>> {
        let edge = self.config.edge_timeout();
        let mut byte = 0u8;
        for _ in 0..8 {
            self.watch.level(true, edge)?;
            byte = (byte << 1) | u8::from(self.sda.is_high()?);
            self.watch.level(false, edge)?;
        }
        Ok(byte)
    }

    /// Drives the acknowledge bit for one clock pulse. Call with SCL low.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the master stops clocking; SDA is released.
    pub fn send_ack(&mut self, ack: AckBit) -> Result<(), Error<E>> {
        let edge = self.config.edge_timeout();
        let mut tx = self.sda.transmit();
        tx.set(ack.level())?;
        self.watch.level(true, edge)?;
        self.watch.level(false, edge)?;
        tx.finish()?;
        Ok(())
    }

    /// Reads eight bits and acknowledges them.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the master stops clocking.
    pub fn read_byte(&mut self) -> Result<u8, Error<E>> {
        let byte = self.read_bits()?;
        self.send_ack(AckBit::Ack)?;
        Ok(byte)
    }

    /// Reads a byte, reporting a STOP or repeated START seen during any of
    /// its clock-high phases instead.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the master stops clocking.
    pub fn read_byte_with_stop_check(&mut self) -> Result<SlaveByte, Error<E>> {
        let edge = self.config.edge_timeout();
        let mut byte = 0u8;
        for _ in 0..8 {
            self.watch.level(true, edge)?;
            let level = self.sda.is_high()?;
            match self.watch.high_phase(&mut self.sda, level, edge)? {
                HighPhase::ClockFell => byte = (byte << 1) | u8::from(level),
                HighPhase::DataRose => return Ok(SlaveByte::Stop),
                HighPhase::DataFell => return Ok(SlaveByte::Start),
            }
        }
        self.send_ack(AckBit::Ack)?;
        Ok(SlaveByte::Data(byte))
    }

    /// Shifts out `byte` MSB first and samples the master's acknowledge.
    ///
    /// Each bit is placed while SCL is low and held through the high phase.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the master stops clocking; SDA is released.
    pub fn write_byte(&mut self, byte: u8) -> Result<AckBit, Error<E>> {
        let edge = self.config.edge_timeout();
        self.watch.level(false, edge)?;
        let mut tx = self.sda.transmit();
        for bit in (0..8).rev() {
            tx.set(byte & (1 << bit) != 0)?;
            self.watch.level(true, edge)?;
            self.watch.level(false, edge)?;
        }
        tx.finish()?;

        self.watch.level(true, edge)?;
        let ack = self
            .sda
            .sample_ack(&mut self.watch.delay, self.config.ack_sampling)?;
        self.watch.level(false, edge)?;
        trace!("i2c slave: sent {byte:#04x}, master {ack:?}");
        Ok(ack)
    }

    /// After the master's NACK, waits for the STOP or repeated START.
    fn await_condition(&mut self) -> Result<End, Error<E>> {
        let edge = self.config.edge_timeout();
        loop {
            self.watch.level(true, edge)?;
            let level = self.sda.is_high()?;
            match self.watch.high_phase(&mut self.sda, level, edge)? {
                HighPhase::DataRose => return Ok(End::Stop),
                HighPhase::DataFell => return Ok(End::RepeatedStart),
                HighPhase::ClockFell => {}
            }
        }
    }

    fn receive<T: RegisterTarget>(
        &mut self,
        target: &mut T,
        summary: &mut Transaction,
    ) -> Result<End, Error<E>> {
        let mut first = true;
        loop {
            match self.read_byte_with_stop_check()? {
                SlaveByte::Data(byte) => {
                    if first {
                        target.on_register_select(byte);
                    } else {
                        target.on_register_write(byte);
                    }
                    first = false;
                    summary.record(byte);
                }
                SlaveByte::Stop => return Ok(End::Stop),
                SlaveByte::Start => return Ok(End::RepeatedStart),
            }
        }
    }

    fn transmit<T: RegisterTarget>(
        &mut self,
        target: &mut T,
        summary: &mut Transaction,
    ) -> Result<End, Error<E>> {
        loop {
            let byte = target.on_register_read();
            summary.record(byte);
            let ack = self.write_byte(byte)?;
            summary.record_ack(ack);
            if !ack.is_ack() {
                break;
            }
        }
        self.await_condition()
    }

    /// Listens for one transaction and serves it against `target`.
    ///
    /// Write segments deliver a register select followed by register writes;
    /// read segments send bytes until the master answers NACK. A repeated
    /// START re-matches the address and continues in the new direction.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if no START arrives or the master stops clocking.
    pub fn serve<T: RegisterTarget>(&mut self, target: &mut T) -> Result<Activity, Error<E>> {
        let Listen::Addressed(mut direction) = self.listen()? else {
            return Ok(Activity::NotAddressed);
        };
        let mut summary = Transaction::new(direction);
        let mut repeated = false;
        loop {
            target.on_transaction_start(direction, repeated);
            let end = match direction {
                Direction::Write => self.receive(target, &mut summary)?,
                Direction::Read => self.transmit(target, &mut summary)?,
            };
            match end {
                End::Stop => {
                    target.on_stop();
                    break;
                }
                End::RepeatedStart => match self.match_address()? {
                    Listen::Addressed(next) => {
                        direction = next;
                        repeated = true;
                        summary.direction = next;
                        summary.repeated_start = true;
                    }
                    Listen::NotAddressed => break,
                },
            }
        }
        debug!("i2c slave: served {} bytes", summary.bytes.len());
        Ok(Activity::Transaction(summary))
    }
}

impl<SCL, SDA, D, C, E> SlaveEngine for PollingSlave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    type LineError = E;

    fn now(&mut self) -> Instant {
        self.watch.clock.now()
    }

    fn service<T: RegisterTarget>(&mut self, target: &mut T) -> Result<Activity, Error<E>> {
        self.serve(target)
    }
}
