// Licensed under the Apache-2.0 license

//! Edge-triggered slave.
//!
//! Both lines are sampled once per tick and each change is classified into a
//! [`SlaveEvent`]. The protocol position lives in [`State`], so nothing ever
//! blocks on an edge: one [`EdgeSlave::poll`] looks at the lines once and
//! either handles an event or reports `WouldBlock`.
//!
//! Data is read on SCL rising edges and changed on SCL falling edges. Since
//! the slave holds SDA across ticks (ACK, transmitted bits) it drives the
//! line directly instead of through a scoped guard; every path back to
//! [`State::Idle`] releases it.

use crate::common::{Clock, Instant};
use crate::i2c::common::{AckBit, BusConfig, Direction, SlaveEvent};
use crate::i2c::error::Error;
use crate::i2c::line::OpenDrain;
use crate::i2c::traits::{Activity, RegisterTarget, SlaveEngine};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, trace, warn};

/// MSB-first bit accumulator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Shift {
    value: u8,
    bits: u8,
}

impl Shift {
    /// Adds a bit; yields the byte once eight have been collected.
    fn push(&mut self, bit: bool) -> Option<u8> {
        self.value = (self.value << 1) | u8::from(bit);
        self.bits += 1;
        (self.bits == 8).then_some(self.value)
    }
}

/// What follows the acknowledge bit the slave is sending.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AfterAck {
    Receive { first: bool },
    Transmit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Address(Shift),
    /// Byte complete; ACK goes out on the next falling edge.
    AckPending(AfterAck),
    /// ACK on the line until the next falling edge.
    Acking(AfterAck),
    Receive { shift: Shift, first: bool },
    /// `sent` bits of `byte` are on the line or gone.
    Transmit { byte: u8, sent: u8 },
    /// Byte sent and SDA released; master ACK is read on the rising edge.
    MasterAck,
    MasterAcked(AckBit),
}

/// Slave that reacts to classified line edges, one sample per tick.
pub struct EdgeSlave<SCL, SDA, D, C> {
    scl: SCL,
    sda: OpenDrain<SDA>,
    delay: D,
    clock: C,
    config: BusConfig,
    state: State,
    /// `(scl, sda)` at the previous sample.
    previous: (bool, bool),
    last_edge: Instant,
    repeated: bool,
    addressed: bool,
}

impl<SCL, SDA, D, C, E> EdgeSlave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    /// Takes the lines, releases SDA and records their current levels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Line`] if a line cannot be read or released.
    pub fn new(
        mut scl: SCL,
        sda: SDA,
        delay: D,
        mut clock: C,
        config: BusConfig,
    ) -> Result<Self, Error<E>> {
        let mut sda = OpenDrain::new(sda)?;
        let previous = (scl.is_high()?, sda.is_high()?);
        let last_edge = clock.now();
        Ok(Self {
            scl,
            sda,
            delay,
            clock,
            config,
            state: State::Idle,
            previous,
            last_edge,
            repeated: false,
            addressed: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: BusConfig) {
        self.config = config;
    }

    /// No transaction in progress.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Returns the pins and time sources.
    pub fn free(self) -> (SCL, SDA, D, C) {
        (self.scl, self.sda.free(), self.delay, self.clock)
    }

    /// Samples both lines once and handles the resulting event, if any.
    ///
    /// Also drops back to idle when a transaction has seen no edge for
    /// `edge_timeout`.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the lines did not change, [`Error::Line`] on faults.
    pub fn poll<T: RegisterTarget>(&mut self, target: &mut T) -> nb::Result<SlaveEvent, Error<E>> {
        // SDA first: a data change right after SCL fell must not look like
        // START or STOP.
        let sda = self.sda.is_high().map_err(Error::Line)?;
        let scl = self.scl.is_high().map_err(Error::Line)?;
        let previous = core::mem::replace(&mut self.previous, (scl, sda));
        let Some(event) = SlaveEvent::classify(previous, (scl, sda)) else {
            self.expire()?;
            return Err(nb::Error::WouldBlock);
        };
        self.last_edge = self.clock.now();
        self.handle(event, sda, target)?;
        Ok(event)
    }

    fn expire(&mut self) -> Result<(), Error<E>> {
        if self.state == State::Idle {
            return Ok(());
        }
        let now = self.clock.now();
        let quiet = now.checked_duration_since(self.last_edge);
        if quiet.is_some_and(|quiet| quiet > self.config.edge_timeout()) {
            warn!(
                "i2c slave: no edge for {} ms, resetting",
                self.config.edge_timeout.ticks()
            );
            self.reset()?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error<E>> {
        self.state = State::Idle;
        self.addressed = false;
        self.sda.hold(true)?;
        Ok(())
    }

    fn handle<T: RegisterTarget>(
        &mut self,
        event: SlaveEvent,
        sda: bool,
        target: &mut T,
    ) -> Result<(), Error<E>> {
        match event {
            SlaveEvent::Start => {
                self.repeated = self.state != State::Idle;
                self.sda.hold(true)?;
                self.state = State::Address(Shift::default());
                trace!("i2c slave: START");
            }
            SlaveEvent::Stop => {
                let addressed = self.addressed;
                self.reset()?;
                if addressed {
                    target.on_stop();
                }
                trace!("i2c slave: STOP");
            }
            SlaveEvent::ClockRisingEdge => self.rising(sda, target),
            SlaveEvent::ClockFallingEdge => self.falling(target)?,
        }
        Ok(())
    }

    fn rising<T: RegisterTarget>(&mut self, sda: bool, target: &mut T) {
        match self.state {
            State::Address(mut shift) => {
                let Some(byte) = shift.push(sda) else {
                    self.state = State::Address(shift);
                    return;
                };
                let address = byte >> 1;
                if address != self.config.own_address {
                    trace!("i2c slave: {address:#04x} is not us");
                    self.state = State::Idle;
                    return;
                }
                let direction = Direction::from_rw_bit(byte & 1 != 0);
                debug!("i2c slave: addressed for {direction:?}");
                self.addressed = true;
                target.on_transaction_start(direction, self.repeated);
                self.state = State::AckPending(match direction {
                    Direction::Write => AfterAck::Receive { first: true },
                    Direction::Read => AfterAck::Transmit,
                });
            }
            State::Receive { mut shift, first } => {
                let Some(byte) = shift.push(sda) else {
                    self.state = State::Receive { shift, first };
                    return;
                };
                if first {
                    target.on_register_select(byte);
                } else {
                    target.on_register_write(byte);
                }
                trace!("i2c slave: received {byte:#04x}");
                self.state = State::AckPending(AfterAck::Receive { first: false });
            }
            State::MasterAck => self.state = State::MasterAcked(AckBit::from_level(sda)),
            _ => {}
        }
    }

    fn falling<T: RegisterTarget>(&mut self, target: &mut T) -> Result<(), Error<E>> {
        match self.state {
            State::AckPending(next) => {
                self.sda.hold(AckBit::Ack.level())?;
                self.state = State::Acking(next);
            }
            State::Acking(AfterAck::Receive { first }) => {
                self.sda.hold(true)?;
                self.state = State::Receive {
                    shift: Shift::default(),
                    first,
                };
            }
            State::Acking(AfterAck::Transmit) | State::MasterAcked(AckBit::Ack) => {
                self.load(target)?;
            }
            State::Transmit { byte, sent } if sent < 8 => {
                self.sda.hold(byte & (0x80 >> sent) != 0)?;
                self.state = State::Transmit {
                    byte,
                    sent: sent + 1,
                };
            }
            State::Transmit { .. } => {
                self.sda.hold(true)?;
                self.state = State::MasterAck;
            }
            State::MasterAcked(AckBit::Nack) => {
                trace!("i2c slave: master NACK, done sending");
                self.state = State::Idle;
            }
            _ => {}
        }
        Ok(())
    }

    /// Fetches the next byte and puts its MSB on the line.
    fn load<T: RegisterTarget>(&mut self, target: &mut T) -> Result<(), Error<E>> {
        let byte = target.on_register_read();
        trace!("i2c slave: sending {byte:#04x}");
        self.sda.hold(byte & 0x80 != 0)?;
        self.state = State::Transmit { byte, sent: 1 };
        Ok(())
    }
}

impl<SCL, SDA, D, C, E> SlaveEngine for EdgeSlave<SCL, SDA, D, C>
where
    SCL: InputPin<Error = E>,
    SDA: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    type LineError = E;

    fn now(&mut self) -> Instant {
        self.clock.now()
    }

    fn service<T: RegisterTarget>(&mut self, target: &mut T) -> Result<Activity, Error<E>> {
        let activity = match self.poll(target) {
            Ok(event) => Activity::Event(event),
            Err(nb::Error::WouldBlock) => Activity::Idle,
            Err(nb::Error::Other(error)) => return Err(error),
        };
        self.delay.delay_us(self.config.tick.ticks());
        Ok(activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::common::SlaveStrategy;
    use crate::i2c::slave::run;
    use crate::i2c::I2cController;
    use crate::sim::{self, Bus, Participant, Recorder, Seen, SimPin, Wire};
    use crate::vl53l0x::{VirtualPeripheral, RESULT_RANGE_VAL};
    use core::sync::atomic::{AtomicBool, Ordering};
    use hex_literal::hex;
    use std::sync::Arc;

    type SimSlave = EdgeSlave<SimPin, SimPin, Participant, Participant>;
    type SimMaster = I2cController<SimPin, SimPin, Participant>;

    fn setup() -> (Bus, SimMaster, Participant, SimSlave, Participant) {
        let bus = Bus::new();
        let config = sim::config(SlaveStrategy::EdgeTriggered);
        let master_time = bus.participant();
        let slave_time = bus.participant();
        let master = I2cController::new(
            bus.pin(Wire::Scl),
            bus.pin(Wire::Sda),
            master_time.clone(),
            config,
        )
        .unwrap();
        let slave = EdgeSlave::new(
            bus.pin(Wire::Scl),
            bus.pin(Wire::Sda),
            slave_time.clone(),
            slave_time.clone(),
            config,
        )
        .unwrap();
        (bus, master, master_time, slave, slave_time)
    }

    /// Serves `target` until the returned flag is raised.
    fn serve<T: RegisterTarget + Send + 'static>(
        mut slave: SimSlave,
        time: &Participant,
        mut target: T,
    ) -> (Arc<AtomicBool>, std::thread::JoinHandle<(SimSlave, T)>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = sim::spawn(time, move || {
            run(&mut slave, &mut target, &flag).unwrap();
            (slave, target)
        });
        (shutdown, handle)
    }

    #[test]
    fn test_shift_collects_msb_first() {
        let mut shift = Shift::default();
        let bits = [false, true, false, true, false, false, true];
        for bit in bits {
            assert_eq!(shift.push(bit), None);
        }
        assert_eq!(shift.push(false), Some(0x52));
    }

    #[test]
    fn test_write_and_read_registers() {
        let (bus, mut master, master_time, slave, slave_time) = setup();
        let (shutdown, handle) = serve(slave, &slave_time, Recorder::replying(&hex!("1122")));

        let mut buffer = [0u8; 2];
        {
            let _session = master_time.enter();
            assert_eq!(master.write(0x29, &hex!("0a7f")), Ok(2));
            assert_eq!(master.read(0x29, &mut buffer), Ok(2));
            shutdown.store(true, Ordering::Release);
        }
        let (slave, recorder) = handle.join().unwrap();

        assert_eq!(buffer, hex!("1122"));
        assert_eq!(
            recorder.seen,
            std::vec![
                Seen::Start(Direction::Write, false),
                Seen::Select(0x0A),
                Seen::Write(0x7F),
                Seen::Stop,
                Seen::Start(Direction::Read, false),
                Seen::Read(0x11),
                Seen::Read(0x22),
                Seen::Stop,
            ]
        );
        assert!(slave.is_idle());
        assert!(bus.is_high(Wire::Sda));
    }

    #[test]
    fn test_sensor_cursor_across_transactions() {
        let (_bus, mut master, master_time, slave, slave_time) = setup();
        let sensor = VirtualPeripheral::new(5).with_distance(523);
        let (shutdown, handle) = serve(slave, &slave_time, sensor);

        let (mut high, mut low) = ([0u8], [0u8]);
        {
            let _session = master_time.enter();
            master.write(0x29, &[RESULT_RANGE_VAL]).unwrap();
            master.read(0x29, &mut high).unwrap();
            master.read(0x29, &mut low).unwrap();
            shutdown.store(true, Ordering::Release);
        }
        let (_, sensor) = handle.join().unwrap();

        assert_eq!((high, low), ([0x02], [0x0B]));
        assert_eq!(sensor.registers().cursor(), RESULT_RANGE_VAL + 2);
    }

    #[test]
    fn test_repeated_start_is_reported() {
        let (_bus, mut master, master_time, slave, slave_time) = setup();
        let (shutdown, handle) = serve(slave, &slave_time, Recorder::replying(&[0x5A]));

        let mut buffer = [0u8; 1];
        {
            let _session = master_time.enter();
            master.write_read(0x29, &[0x13], &mut buffer).unwrap();
            shutdown.store(true, Ordering::Release);
        }
        let (_, recorder) = handle.join().unwrap();

        assert_eq!(buffer, [0x5A]);
        assert_eq!(
            recorder.seen,
            std::vec![
                Seen::Start(Direction::Write, false),
                Seen::Select(0x13),
                Seen::Start(Direction::Read, true),
                Seen::Read(0x5A),
                Seen::Stop,
            ]
        );
    }

    #[test]
    fn test_other_address_is_ignored() {
        let (bus, mut master, master_time, slave, slave_time) = setup();
        let (shutdown, handle) = serve(slave, &slave_time, Recorder::default());

        {
            let _session = master_time.enter();
            assert_eq!(master.write(0x30, &[0x01]), Err(Error::AddressNack));
            shutdown.store(true, Ordering::Release);
        }
        let (_, recorder) = handle.join().unwrap();

        assert!(recorder.seen.is_empty());
        assert!(bus.is_high(Wire::Sda));
    }

    #[test]
    fn test_stale_transaction_releases_ack() {
        let (bus, mut master, master_time, slave, slave_time) = setup();
        let (shutdown, handle) = serve(slave, &slave_time, Recorder::default());

        {
            let _session = master_time.enter();
            master.generate_start().unwrap();
            let address = Direction::Write.address_byte(0x29);
            for bit in (0..8).rev() {
                master.write_bit(address & (1 << bit) != 0).unwrap();
            }
            // The slave drives its ACK within a tick, then the clock stops.
            master.pause(fugit::MicrosDurationU32::micros(100));
            assert!(!bus.is_high(Wire::Sda));
            master.pause(fugit::MicrosDurationU32::micros(20_000));
            shutdown.store(true, Ordering::Release);
        }
        let (slave, recorder) = handle.join().unwrap();

        assert!(slave.is_idle());
        assert!(bus.is_high(Wire::Sda));
        assert_eq!(recorder.seen, std::vec![Seen::Start(Direction::Write, false)]);
    }
}
