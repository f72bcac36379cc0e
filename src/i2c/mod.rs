// Licensed under the Apache-2.0 license

//! Bit-banged I2C over two GPIO lines.
//!
//! The master ([`i2c_controller::I2cController`]) and the slave engines
//! ([`slave`]) work on any pins implementing the embedded-hal digital traits,
//! so the same code runs against real GPIO or against a simulated bus.

pub mod common;
pub mod error;
pub mod i2c_controller;
pub mod line;
pub mod recovery;
#[cfg(feature = "i2c_target")]
pub mod slave;
pub mod traits;
#[cfg(feature = "i2c_target")]
mod wait;

pub use common::{
    AckBit, AckSampling, BusConfig, BusConfigBuilder, ConfigurationError, Direction, SlaveEvent,
    SlaveStrategy,
};
pub use error::Error;
pub use i2c_controller::{I2cController, LineState};
pub use line::{claim_lines, LineDriver, OpenDrain, ReclaimingLine};
pub use recovery::{retry, Recovery, RetryPolicy};
#[cfg(feature = "i2c_target")]
pub use slave::{run, Slave};
#[cfg(feature = "i2c_target")]
pub use traits::{Activity, RegisterTarget, SlaveEngine, Transaction};
