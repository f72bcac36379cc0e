// Licensed under the Apache-2.0 license

//! Bit-banged I2C master.
//!
//! The controller owns the clock pin, the data line and a delay provider. It
//! exposes the bus conditions and bit/byte primitives as well as complete
//! addressed transfers, and implements [`embedded_hal::i2c::I2c`] so that
//! device drivers can run on top of it unchanged.
//!
//! Timing is derived from a single bit period `T` ([`BusConfig::bit_period`]).
//! A data bit holds SCL high for `2T`, and every level change is followed by
//! at least `T` of settling, which keeps a software slave sampling at `T/10`
//! comfortably inside each window.

use crate::i2c::common::{AckBit, BusConfig, Direction, MAX_ADDRESS};
use crate::i2c::error::Error;
use crate::i2c::line::{OpenDrain, Transmit};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::{Operation, SevenBitAddress};
use log::{debug, trace, warn};

/// First address probed by [`I2cController::scan`].
pub const SCAN_FIRST: u8 = 0x03;
/// Last address probed by [`I2cController::scan`].
pub const SCAN_LAST: u8 = 0x77;
/// Number of addresses in the scan range.
pub const SCAN_COUNT: usize = (SCAN_LAST - SCAN_FIRST) as usize + 1;

/// Addresses that acknowledged a scan.
pub type ScanResult = heapless::Vec<u8, SCAN_COUNT>;

/// Levels of both lines at one instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineState {
    pub scl: bool,
    pub sda: bool,
}

impl LineState {
    /// Both lines released.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scl && self.sda
    }
}

pub struct I2cController<SCL, SDA, D> {
    pub(crate) scl: SCL,
    pub(crate) sda: OpenDrain<SDA>,
    pub(crate) delay: D,
    pub(crate) config: BusConfig,
}

impl<SCL, SDA, D, E> I2cController<SCL, SDA, D>
where
    SCL: InputPin<Error = E> + OutputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
{
    /// Takes both lines and releases them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if either line cannot be released.
    pub fn new(mut scl: SCL, sda: SDA, delay: D, config: BusConfig) -> Result<Self, Error<E>> {
        scl.set_high()?;
        let sda = OpenDrain::new(sda)?;
        Ok(Self {
            scl,
            sda,
            delay,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: BusConfig) {
        self.config = config;
    }

    /// Returns the pins and the delay provider.
    pub fn free(self) -> (SCL, SDA, D) {
        (self.scl, self.sda.free(), self.delay)
    }

    pub(crate) fn settle(&mut self, periods: u32) {
        self.delay.delay_us(self.config.period_us() * periods);
    }

    /// Samples both lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a read fails.
    pub fn line_state(&mut self) -> Result<LineState, Error<E>> {
        Ok(LineState {
            scl: self.scl.is_high()?,
            sda: self.sda.is_high()?,
        })
    }

    /// START, or repeated START when issued inside a transaction.
    ///
    /// Releases both lines and checks the bus is idle, retrying up to
    /// `start_retries` times one bit period apart, then pulls SDA low with
    /// SCL high and finally pulls SCL low.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the bus never reads idle.
    pub fn generate_start(&mut self) -> Result<(), Error<E>> {
        self.sda.release()?;
        self.scl.set_high()?;
        self.settle(1);

        let mut attempt = 0;
        while !self.line_state()?.is_idle() {
            attempt += 1;
            if attempt >= self.config.start_retries {
                warn!("i2c: bus busy, no START after {attempt} checks");
                return Err(Error::Timeout);
            }
            self.settle(1);
        }

        let period = self.config.period_us();
        let mut tx = self.sda.transmit();
        tx.set(false)?;
        self.delay.delay_us(period);
        self.scl.set_low()?;
        // SCL is low, so letting SDA go here is not a STOP.
        tx.finish()?;
        self.delay.delay_us(period);
        Ok(())
    }

    /// STOP: SDA rises while SCL is high. Leaves both lines released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be driven.
    pub fn generate_stop(&mut self) -> Result<(), Error<E>> {
        let period = self.config.period_us();
        let mut tx = self.sda.transmit();
        tx.set(false)?;
        self.scl.set_low()?;
        self.delay.delay_us(period);
        self.scl.set_high()?;
        self.delay.delay_us(period);
        tx.finish()?;
        self.delay.delay_us(period);
        Ok(())
    }

    /// Clocks out one bit, then releases SDA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be driven.
    pub fn write_bit(&mut self, level: bool) -> Result<(), Error<E>> {
        let period = self.config.period_us();
        let mut tx = self.sda.transmit();
        shift_out(&mut tx, &mut self.scl, &mut self.delay, level, period)?;
        tx.finish()?;
        Ok(())
    }

    /// Raises SCL, samples SDA after one period, lowers SCL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be read or driven.
    pub fn read_bit(&mut self) -> Result<bool, Error<E>> {
        self.scl.set_high()?;
        self.settle(1);
        let level = self.sda.is_high()?;
        self.scl.set_low()?;
        self.settle(1);
        Ok(level)
    }

    fn read_ack(&mut self) -> Result<AckBit, Error<E>> {
        self.scl.set_high()?;
        self.settle(1);
        let ack = self.sda.sample_ack(&mut self.delay, self.config.ack_sampling)?;
        self.scl.set_low()?;
        self.settle(1);
        Ok(ack)
    }

    /// Shifts out `byte` MSB first and reads the acknowledge bit.
    ///
    /// SDA is held for the whole byte and released one period before the
    /// ACK clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be read or driven.
    pub fn write_byte(&mut self, byte: u8) -> Result<AckBit, Error<E>> {
        let period = self.config.period_us();
        let mut tx = self.sda.transmit();
        for bit in (0..8).rev() {
            let level = byte & (1 << bit) != 0;
            shift_out(&mut tx, &mut self.scl, &mut self.delay, level, period)?;
        }
        tx.finish()?;
        self.delay.delay_us(period);
        let ack = self.read_ack()?;
        trace!("i2c: wrote {byte:#04x}, {ack:?}");
        Ok(ack)
    }

    /// Shifts in one byte MSB first and answers with `ack`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be read or driven.
    pub fn read_byte(&mut self, ack: AckBit) -> Result<u8, Error<E>> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(self.read_bit()?);
        }
        let period = self.config.period_us();
        let mut tx = self.sda.transmit();
        shift_out(&mut tx, &mut self.scl, &mut self.delay, ack.level(), period)?;
        tx.finish()?;
        self.delay.delay_us(period);
        trace!("i2c: read {byte:#04x}, answered {ack:?}");
        Ok(byte)
    }

    /// Sends the address byte. On NACK emits STOP and fails.
    fn address(&mut self, address: SevenBitAddress, direction: Direction) -> Result<(), Error<E>> {
        if self.write_byte(direction.address_byte(address))?.is_ack() {
            Ok(())
        } else {
            debug!("i2c: address {address:#04x} not acknowledged");
            self.generate_stop()?;
            Err(Error::AddressNack)
        }
    }

    /// START that emits STOP before reporting a busy bus. Serves the first
    /// and any repeated START of a transfer.
    fn begin(&mut self) -> Result<(), Error<E>> {
        match self.generate_start() {
            Err(Error::Timeout) => {
                self.generate_stop()?;
                Err(Error::Timeout)
            }
            other => other,
        }
    }

    /// Writes `bytes`; on NACK emits STOP and reports how many went through.
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
        for (transferred, &byte) in bytes.iter().enumerate() {
            if !self.write_byte(byte)?.is_ack() {
                debug!("i2c: data NACK after {transferred} bytes");
                self.generate_stop()?;
                return Err(Error::DataNack { transferred });
            }
        }
        Ok(())
    }

    /// Fills `buffer`, acknowledging every byte except the last one when
    /// `nack_last` is set.
    fn receive(&mut self, buffer: &mut [u8], nack_last: bool) -> Result<(), Error<E>> {
        let last = buffer.len().saturating_sub(1);
        for (index, slot) in buffer.iter_mut().enumerate() {
            let ack = if nack_last && index == last {
                AckBit::Nack
            } else {
                AckBit::Ack
            };
            *slot = self.read_byte(ack)?;
        }
        Ok(())
    }

    /// START, address with write bit, `bytes`, STOP.
    ///
    /// # Errors
    ///
    /// [`Error::AddressNack`] or [`Error::DataNack`] after emitting STOP,
    /// [`Error::Timeout`] if the bus is busy, [`Error::InvalidAddress`]
    /// without touching the bus.
    pub fn write(&mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<usize, Error<E>> {
        check_address(address)?;
        self.begin()?;
        self.address(address, Direction::Write)?;
        self.send(bytes)?;
        self.generate_stop()?;
        Ok(bytes.len())
    }

    /// START, address with read bit, fill `buffer`, STOP.
    ///
    /// The last byte is answered with NACK. An empty buffer touches nothing.
    ///
    /// # Errors
    ///
    /// [`Error::AddressNack`] after emitting STOP, [`Error::Timeout`] if the
    /// bus is busy.
    pub fn read(&mut self, address: SevenBitAddress, buffer: &mut [u8]) -> Result<usize, Error<E>> {
        check_address(address)?;
        if buffer.is_empty() {
            return Ok(0);
        }
        self.begin()?;
        self.address(address, Direction::Read)?;
        self.receive(buffer, true)?;
        self.generate_stop()?;
        Ok(buffer.len())
    }

    /// Write then read with a repeated START in between.
    ///
    /// # Errors
    ///
    /// As [`I2cController::write`] and [`I2cController::read`].
    pub fn write_read(
        &mut self,
        address: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Error<E>> {
        let mut operations = [Operation::Write(bytes), Operation::Read(buffer)];
        self.transaction(address, &mut operations)
    }

    /// Runs `operations` as one transaction.
    ///
    /// Adjacent operations of the same kind are merged; a change of kind
    /// issues a repeated START and the address again. Only the very last
    /// byte of a read run is answered with NACK.
    ///
    /// # Errors
    ///
    /// As [`I2cController::write`] and [`I2cController::read`].
    pub fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error<E>> {
        check_address(address)?;
        let mut previous: Option<Direction> = None;
        for index in 0..operations.len() {
            let next_is_read = matches!(operations.get(index + 1), Some(Operation::Read(_)));
            let Some(operation) = operations.get_mut(index) else {
                break;
            };
            let direction = match operation {
                Operation::Write(_) => Direction::Write,
                Operation::Read(_) => Direction::Read,
            };
            if previous != Some(direction) {
                self.begin()?;
                self.address(address, direction)?;
            }
            match operation {
                Operation::Write(bytes) => self.send(*bytes)?,
                Operation::Read(buffer) => self.receive(buffer, !next_is_read)?,
            }
            previous = Some(direction);
        }
        if previous.is_some() {
            self.generate_stop()?;
        }
        Ok(())
    }

    /// START, address with write bit, STOP. True if acknowledged.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if the bus is busy, [`Error::InvalidAddress`] for
    /// addresses above 0x7F, [`Error::Line`] on line faults.
    pub fn probe(&mut self, address: SevenBitAddress) -> Result<bool, Error<E>> {
        check_address(address)?;
        self.begin()?;
        let ack = self.write_byte(Direction::Write.address_byte(address))?;
        self.generate_stop()?;
        Ok(ack.is_ack())
    }

    /// Probes every address from [`SCAN_FIRST`] to [`SCAN_LAST`].
    ///
    /// # Errors
    ///
    /// Stops at the first [`Error::Timeout`] or [`Error::Line`].
    pub fn scan(&mut self) -> Result<ScanResult, Error<E>> {
        let mut found = ScanResult::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            if self.probe(address)? {
                debug!("i2c: device at {address:#04x}");
                // Capacity covers the whole range.
                let _ = found.push(address);
            }
        }
        Ok(found)
    }
}

fn check_address<E>(address: SevenBitAddress) -> Result<(), Error<E>> {
    if address > MAX_ADDRESS {
        return Err(Error::InvalidAddress(address));
    }
    Ok(())
}

/// Puts `level` on SDA while SCL is low, then clocks it: `T` setup, `2T` high.
fn shift_out<SCL, SDA, D, E>(
    tx: &mut Transmit<'_, SDA>,
    scl: &mut SCL,
    delay: &mut D,
    level: bool,
    period: u32,
) -> Result<(), Error<E>>
where
    SCL: OutputPin<Error = E>,
    SDA: OutputPin<Error = E>,
    D: DelayNs,
{
    tx.set(level)?;
    delay.delay_us(period);
    scl.set_high()?;
    delay.delay_us(period * 2);
    scl.set_low()?;
    Ok(())
}

impl<SCL, SDA, D, E> embedded_hal::i2c::ErrorType for I2cController<SCL, SDA, D>
where
    SCL: InputPin<Error = E> + OutputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    type Error = Error<E>;
}

impl<SCL, SDA, D, E> embedded_hal::i2c::I2c for I2cController<SCL, SDA, D>
where
    SCL: InputPin<Error = E> + OutputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    fn read(&mut self, address: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        I2cController::read(self, address, buffer).map(|_| ())
    }

    fn write(&mut self, address: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        I2cController::write(self, address, bytes).map(|_| ())
    }

    fn write_read(
        &mut self,
        address: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        I2cController::write_read(self, address, bytes, buffer)
    }

    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        I2cController::transaction(self, address, operations)
    }
}
