// Licensed under the Apache-2.0 license

//! VL53L0X time-of-flight range sensor: register map, a master-side client
//! and a slave-side emulator.
//!
//! Only the registers needed for single-shot ranging are modelled.

pub mod driver;
#[cfg(feature = "i2c_target")]
pub mod emulator;

pub use driver::{DeviceId, DriverError, Vl53l0x};
#[cfg(feature = "i2c_target")]
pub use emulator::{Phase, RegisterFile, VirtualPeripheral};

use fugit::MillisDurationU32;

/// Factory-default bus address.
pub const ADDRESS: u8 = 0x29;

pub const SYSRANGE_START: u8 = 0x00;
pub const SYSTEM_INTERRUPT_CONFIG_GPIO: u8 = 0x0A;
pub const SYSTEM_INTERRUPT_CLEAR: u8 = 0x0B;
pub const RESULT_INTERRUPT_STATUS: u8 = 0x13;
pub const RESULT_RANGE_STATUS: u8 = 0x14;
/// High byte of the distance; the low byte follows at the next address.
pub const RESULT_RANGE_VAL: u8 = 0x1E;
pub const GPIO_HV_MUX_ACTIVE_HIGH: u8 = 0x84;
pub const VHV_CONFIG_PAD_SCL_SDA_EXTSUP_HV: u8 = 0x89;
pub const IDENTIFICATION_MODEL_ID: u8 = 0xC0;
pub const IDENTIFICATION_REVISION_ID: u8 = 0xC2;

pub const MODEL_ID: u8 = 0xEE;
pub const REVISION_ID: u8 = 0x10;

/// SYSRANGE_START bit that triggers a single measurement.
pub const START_SINGLE: u8 = 0x01;
/// RESULT_INTERRUPT_STATUS value once a new range is available.
pub const STATUS_DATA_READY: u8 = 0x07;

/// Time a single measurement takes.
pub const MEASUREMENT_TIME: MillisDurationU32 = MillisDurationU32::millis(75);

/// Shortest distance reported, in millimetres.
pub const MIN_DISTANCE_MM: u16 = 100;
/// Longest distance reported, in millimetres.
pub const MAX_DISTANCE_MM: u16 = 2000;
/// Distance before the first measurement, in millimetres.
pub const DEFAULT_DISTANCE_MM: u16 = 1000;
