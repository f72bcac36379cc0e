// Licensed under the Apache-2.0 license

//! # Slave-side traits
//!
//! Two seams separate the bus from what sits behind it:
//!
//! - [`RegisterTarget`] is the device model. It sees register-level events
//!   (select, write, read, stop) and never touches a line.
//! - [`SlaveEngine`] is the bus-facing implementation that turns line activity
//!   into those events. Two strategies exist, a blocking polling state
//!   machine and a per-tick edge automaton, and both drive any target.
//!
//! ```text
//! lines ──► SlaveEngine ──► RegisterTarget
//!              (polling | edge-triggered)     (register file, sensor model)
//! ```

#[cfg(feature = "i2c_target")]
pub mod target {
    use crate::common::Instant;
    use crate::i2c::common::{AckBit, Direction, SlaveEvent};
    use crate::i2c::error::Error;

    /// Bytes kept in a [`Transaction`] summary.
    pub const TRANSACTION_CAPACITY: usize = 32;

    /// Register-oriented device model behind a slave engine.
    ///
    /// The first byte a master writes after addressing selects a register;
    /// every further written byte is a register write. Reads return bytes from
    /// the selected register onwards. Cursor handling is up to the target.
    pub trait RegisterTarget {
        /// The slave was addressed. `repeated` is set after a repeated START.
        fn on_transaction_start(&mut self, direction: Direction, repeated: bool) {
            let _ = (direction, repeated);
        }

        /// STOP ended a transaction this slave took part in.
        fn on_stop(&mut self) {}

        /// First byte of a write transaction.
        fn on_register_select(&mut self, register: u8);

        /// Every written byte after the register select.
        fn on_register_write(&mut self, value: u8);

        /// Next byte to send to the master.
        fn on_register_read(&mut self) -> u8;

        /// Called from the service loop with the current time, between bus
        /// activity. Long-running device work is advanced here.
        fn advance_time(&mut self, now: Instant) {
            let _ = now;
        }
    }

    impl<T: RegisterTarget + ?Sized> RegisterTarget for &mut T {
        fn on_transaction_start(&mut self, direction: Direction, repeated: bool) {
            (**self).on_transaction_start(direction, repeated);
        }
        fn on_stop(&mut self) {
            (**self).on_stop();
        }
        fn on_register_select(&mut self, register: u8) {
            (**self).on_register_select(register);
        }
        fn on_register_write(&mut self, value: u8) {
            (**self).on_register_write(value);
        }
        fn on_register_read(&mut self) -> u8 {
            (**self).on_register_read()
        }
        fn advance_time(&mut self, now: Instant) {
            (**self).advance_time(now);
        }
    }

    /// Summary of one addressed transaction as seen by the polling slave.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Transaction {
        /// Direction of the last addressed segment.
        pub direction: Direction,
        /// Bytes moved in either direction, first [`TRANSACTION_CAPACITY`] only.
        pub bytes: heapless::Vec<u8, TRANSACTION_CAPACITY>,
        /// Acknowledge bits the master answered read bytes with.
        pub master_acks: heapless::Vec<AckBit, TRANSACTION_CAPACITY>,
        /// Whether a repeated START occurred.
        pub repeated_start: bool,
    }

    impl Transaction {
        #[must_use]
        pub fn new(direction: Direction) -> Self {
            Self {
                direction,
                bytes: heapless::Vec::new(),
                master_acks: heapless::Vec::new(),
                repeated_start: false,
            }
        }

        pub(crate) fn record(&mut self, byte: u8) {
            // Summary only; longer transfers are still served in full.
            let _ = self.bytes.push(byte);
        }

        pub(crate) fn record_ack(&mut self, ack: AckBit) {
            let _ = self.master_acks.push(ack);
        }
    }

    /// What one [`SlaveEngine::service`] call observed.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Activity {
        /// Nothing happened.
        Idle,
        /// Another device was addressed.
        NotAddressed,
        /// The edge automaton handled a line event.
        Event(SlaveEvent),
        /// The polling slave served a whole transaction.
        Transaction(Transaction),
    }

    /// A bus-facing slave implementation.
    pub trait SlaveEngine {
        /// Error type of the underlying lines.
        type LineError;

        /// Current time on the engine's clock.
        fn now(&mut self) -> Instant;

        /// Does one unit of work against `target`.
        ///
        /// For the polling slave this is one full listen-and-serve cycle; for
        /// the edge automaton one sample followed by one tick of delay.
        ///
        /// # Errors
        ///
        /// [`Error::Timeout`] when the bus went quiet mid-transaction or no
        /// START arrived, [`Error::Line`] on line faults.
        fn service<T: RegisterTarget>(
            &mut self,
            target: &mut T,
        ) -> Result<Activity, Error<Self::LineError>>;
    }
}

#[cfg(feature = "i2c_target")]
pub use target::{Activity, RegisterTarget, SlaveEngine, Transaction, TRANSACTION_CAPACITY};
