// Licensed under the Apache-2.0 license

//! Simulated two-wire bus for protocol tests.
//!
//! Lines are wired-AND: each [`SimPin`] owns one bit in its line's mask and the
//! line reads high only while no pin pulls it low. Time is virtual. Every
//! participant runs on its own thread, but only one runs at any instant: a
//! delay parks the caller until it is the participant with the earliest wake
//! time (lowest id on ties), and the virtual clock jumps to that time. Runs
//! are therefore identical from one execution to the next.
//!
//! All participants must be created before any of them enters, and each
//! session must end before its thread is joined.

use crate::common::{Clock, Instant};
use crate::i2c::common::{BusConfig, BusConfigBuilder, SlaveStrategy};
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use fugit::MicrosDurationU32;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::vec::Vec;

/// Bus settings for simulated runs: 100 us bit period, 10 us slave tick.
pub fn config(strategy: SlaveStrategy) -> BusConfig {
    BusConfigBuilder::new()
        .bit_period(MicrosDurationU32::micros(100))
        .tick(MicrosDurationU32::micros(10))
        .strategy(strategy)
        .build()
        .unwrap()
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wire {
    Scl,
    Sda,
}

impl Wire {
    fn index(self) -> usize {
        match self {
            Self::Scl => 0,
            Self::Sda => 1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Waiting(u64),
    Running,
    Done,
}

struct Schedule {
    now_ns: u64,
    slots: Vec<Slot>,
}

impl Schedule {
    /// Hands the bus to the earliest waiter unless someone is running.
    fn dispatch(&mut self) {
        if self.slots.contains(&Slot::Running) {
            return;
        }
        let next = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| match slot {
                Slot::Waiting(wake) => Some((*wake, id)),
                _ => None,
            })
            .min();
        if let Some((wake, id)) = next {
            self.now_ns = self.now_ns.max(wake);
            self.slots[id] = Slot::Running;
        }
    }
}

struct Shared {
    schedule: Mutex<Schedule>,
    turn: Condvar,
    /// Per line, one bit for every pin currently pulling it low.
    pulls: [AtomicU64; 2],
    pins: AtomicU8,
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_turn(&self, id: usize, mut schedule: MutexGuard<'_, Schedule>) {
        schedule.dispatch();
        self.turn.notify_all();
        while schedule.slots[id] != Slot::Running {
            schedule = self
                .turn
                .wait(schedule)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A simulated bus with an SCL and an SDA line, both pulled up.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<Shared>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                schedule: Mutex::new(Schedule {
                    now_ns: 0,
                    slots: Vec::new(),
                }),
                turn: Condvar::new(),
                pulls: [AtomicU64::new(0), AtomicU64::new(0)],
                pins: AtomicU8::new(0),
            }),
        }
    }

    /// A new pin on `wire`, initially released.
    pub fn pin(&self, wire: Wire) -> SimPin {
        let bit = self.shared.pins.fetch_add(1, Ordering::SeqCst);
        assert!(bit < 64, "too many simulated pins");
        SimPin {
            shared: Arc::clone(&self.shared),
            wire: wire.index(),
            mask: 1 << bit,
        }
    }

    /// Registers a new participant. Call before anyone enters.
    pub fn participant(&self) -> Participant {
        let mut schedule = self.shared.schedule();
        schedule.slots.push(Slot::Waiting(0));
        Participant {
            shared: Arc::clone(&self.shared),
            id: schedule.slots.len() - 1,
        }
    }

    pub fn is_high(&self, wire: Wire) -> bool {
        self.shared.pulls[wire.index()].load(Ordering::SeqCst) == 0
    }

    /// Current virtual time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.shared.schedule().now_ns / 1_000
    }
}

/// One participant's view of virtual time: a delay and a clock.
#[derive(Clone)]
pub struct Participant {
    shared: Arc<Shared>,
    id: usize,
}

impl Participant {
    /// Blocks until this participant is scheduled. Time only moves for it
    /// while the returned session is alive.
    pub fn enter(&self) -> Session {
        let schedule = self.shared.schedule();
        self.shared.wait_turn(self.id, schedule);
        Session {
            shared: Arc::clone(&self.shared),
            id: self.id,
        }
    }

    fn sleep(&self, ns: u64) {
        let mut schedule = self.shared.schedule();
        let wake = schedule.now_ns + ns;
        schedule.slots[self.id] = Slot::Waiting(wake);
        self.shared.wait_turn(self.id, schedule);
    }
}

impl DelayNs for Participant {
    fn delay_ns(&mut self, ns: u32) {
        self.sleep(u64::from(ns));
    }
}

impl Clock for Participant {
    fn now(&mut self) -> Instant {
        Instant::from_ticks(self.shared.schedule().now_ns / 1_000)
    }
}

/// Scheduled run of a participant. Dropping it retires the participant.
pub struct Session {
    shared: Arc<Shared>,
    id: usize,
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut schedule = self.shared.schedule();
        schedule.slots[self.id] = Slot::Done;
        schedule.dispatch();
        self.shared.turn.notify_all();
    }
}

/// Runs `work` on a new thread as `participant`.
pub fn spawn<R, F>(participant: &Participant, work: F) -> JoinHandle<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let participant = participant.clone();
    thread::spawn(move || {
        let _session = participant.enter();
        work()
    })
}

/// Open-drain pin on a simulated line.
pub struct SimPin {
    shared: Arc<Shared>,
    wire: usize,
    mask: u64,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.shared.pulls[self.wire].load(Ordering::SeqCst) == 0)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.shared.pulls[self.wire].fetch_or(self.mask, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.shared.pulls[self.wire].fetch_and(!self.mask, Ordering::SeqCst);
        Ok(())
    }
}

/// What a [`Recorder`] was told, in order.
#[cfg(feature = "i2c_target")]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Seen {
    Start(crate::i2c::common::Direction, bool),
    Select(u8),
    Write(u8),
    Read(u8),
    Stop,
}

/// Register target that logs every callback and answers reads from a queue,
/// 0xFF once the queue is empty.
#[cfg(feature = "i2c_target")]
#[derive(Debug, Default)]
pub struct Recorder {
    pub seen: Vec<Seen>,
    pub replies: std::collections::VecDeque<u8>,
}

#[cfg(feature = "i2c_target")]
impl Recorder {
    pub fn replying(replies: &[u8]) -> Self {
        Self {
            seen: Vec::new(),
            replies: replies.iter().copied().collect(),
        }
    }
}

#[cfg(feature = "i2c_target")]
impl crate::i2c::traits::RegisterTarget for Recorder {
    fn on_transaction_start(&mut self, direction: crate::i2c::common::Direction, repeated: bool) {
        self.seen.push(Seen::Start(direction, repeated));
    }

    fn on_stop(&mut self) {
        self.seen.push(Seen::Stop);
    }

    fn on_register_select(&mut self, register: u8) {
        self.seen.push(Seen::Select(register));
    }

    fn on_register_write(&mut self, value: u8) {
        self.seen.push(Seen::Write(value));
    }

    fn on_register_read(&mut self) -> u8 {
        let value = self.replies.pop_front().unwrap_or(0xFF);
        self.seen.push(Seen::Read(value));
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_wired_and() {
        let bus = Bus::new();
        let mut a = bus.pin(Wire::Sda);
        let mut b = bus.pin(Wire::Sda);
        assert!(bus.is_high(Wire::Sda));
        a.set_low().unwrap();
        b.set_low().unwrap();
        a.set_high().unwrap();
        assert!(b.is_low().unwrap());
        assert!(bus.is_high(Wire::Scl));
        b.set_high().unwrap();
        assert!(a.is_high().unwrap());
    }

    #[test]
    fn test_participants_interleave_in_time_order() {
        let bus = Bus::new();
        let fast = bus.participant();
        let slow = bus.participant();
        let trace = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&trace);
        let mut slow_delay = slow.clone();
        let handle = spawn(&slow, move || {
            for _ in 0..3 {
                slow_delay.delay_us(25);
                let now = slow_delay.now().ticks();
                log.lock().unwrap().push(("slow", now));
            }
        });

        {
            let _session = fast.enter();
            let mut fast_delay = fast.clone();
            for _ in 0..4 {
                fast_delay.delay_us(10);
                let now = fast_delay.now().ticks();
                trace.lock().unwrap().push(("fast", now));
            }
        }
        handle.join().unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(
            *trace,
            std::vec![
                ("fast", 10),
                ("fast", 20),
                ("slow", 25),
                ("fast", 30),
                ("fast", 40),
                ("slow", 50),
                ("slow", 75),
            ]
        );
        assert_eq!(bus.now_us(), 75);
    }
}
