// Licensed under the Apache-2.0 license

//! Software I2C over two open-drain GPIO lines.
//!
//! [`i2c::I2cController`] is a bit-banged master that implements
//! [`embedded_hal::i2c::I2c`]. Behind the `i2c_target` feature, [`i2c::slave`]
//! provides polling and edge-triggered slave engines serving any
//! [`i2c::RegisterTarget`], and [`vl53l0x`] includes an emulated range sensor
//! to serve with them.

// Prevent panic-prone patterns in production code only
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
pub mod common;
pub mod i2c;
#[cfg(test)]
mod sim;
pub mod vl53l0x;
