// Licensed under the Apache-2.0 license

//! Master-side VL53L0X access over any [`embedded_hal::i2c::I2c`] bus.
//!
//! Register reads are a one-byte write selecting the register, a settle
//! delay, then a one-byte read, as two separate transactions. A software
//! slave on the other end gets the pause to catch up between them.

use super::{
    ADDRESS, IDENTIFICATION_MODEL_ID, IDENTIFICATION_REVISION_ID, MODEL_ID,
    RESULT_INTERRUPT_STATUS, RESULT_RANGE_STATUS, RESULT_RANGE_VAL, START_SINGLE,
    STATUS_DATA_READY, SYSRANGE_START,
};
use core::fmt;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use fugit::MicrosDurationU32;
use log::debug;

/// Default pause between selecting a register and reading it.
pub const DEFAULT_SETTLE: MicrosDurationU32 = MicrosDurationU32::micros(10_000);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceId {
    pub model: u8,
    pub revision: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverError<E> {
    /// The bus transfer failed.
    Bus(E),
    /// MODEL_ID did not read as expected.
    UnexpectedModel(u8),
}

impl<E> From<E> for DriverError<E> {
    fn from(error: E) -> Self {
        Self::Bus(error)
    }
}

impl<E: fmt::Debug> fmt::Display for DriverError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {e:?}"),
            Self::UnexpectedModel(model) => {
                write!(f, "model id {model:#04x}, expected {MODEL_ID:#04x}")
            }
        }
    }
}

pub struct Vl53l0x<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    settle: MicrosDurationU32,
}

impl<I2C: I2c, D: DelayNs> Vl53l0x<I2C, D> {
    /// Client for a sensor at the factory address.
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: ADDRESS,
            settle: DEFAULT_SETTLE,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: MicrosDurationU32) -> Self {
        self.settle = settle;
        self
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// # Errors
    ///
    /// Returns the bus error if either transfer fails.
    pub fn read_register(&mut self, register: u8) -> Result<u8, I2C::Error> {
        self.i2c.write(self.address, &[register])?;
        self.delay.delay_us(self.settle.ticks());
        let mut value = [0u8];
        self.i2c.read(self.address, &mut value)?;
        let [value] = value;
        Ok(value)
    }

    /// # Errors
    ///
    /// Returns the bus error if the transfer fails.
    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[register, value])
    }

    /// Reads and checks the identification registers.
    ///
    /// # Errors
    ///
    /// [`DriverError::UnexpectedModel`] if something else answers at the
    /// address, [`DriverError::Bus`] on transfer failures.
    pub fn identify(&mut self) -> Result<DeviceId, DriverError<I2C::Error>> {
        let model = self.read_register(IDENTIFICATION_MODEL_ID)?;
        if model != MODEL_ID {
            return Err(DriverError::UnexpectedModel(model));
        }
        let revision = self.read_register(IDENTIFICATION_REVISION_ID)?;
        debug!("vl53l0x: model {model:#04x} revision {revision:#04x}");
        Ok(DeviceId { model, revision })
    }

    /// # Errors
    ///
    /// Returns the bus error if the transfer fails.
    pub fn start_measurement(&mut self) -> Result<(), I2C::Error> {
        self.write_register(SYSRANGE_START, START_SINGLE)
    }

    /// True once a new range is available. Reading clears the flag.
    ///
    /// # Errors
    ///
    /// Returns the bus error if a transfer fails.
    pub fn measurement_ready(&mut self) -> Result<bool, I2C::Error> {
        Ok(self.read_register(RESULT_INTERRUPT_STATUS)? == STATUS_DATA_READY)
    }

    /// # Errors
    ///
    /// Returns the bus error if a transfer fails.
    pub fn read_range_status(&mut self) -> Result<u8, I2C::Error> {
        self.read_register(RESULT_RANGE_STATUS)
    }

    /// Latest distance in millimetres.
    ///
    /// # Errors
    ///
    /// Returns the bus error if a transfer fails.
    pub fn read_distance(&mut self) -> Result<u16, I2C::Error> {
        let high = self.read_register(RESULT_RANGE_VAL)?;
        let low = self.read_register(RESULT_RANGE_VAL.wrapping_add(1))?;
        Ok(u16::from_be_bytes([high, low]))
    }
}
