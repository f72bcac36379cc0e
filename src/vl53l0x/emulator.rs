// Licensed under the Apache-2.0 license

//! Emulated VL53L0X behind a slave engine.
//!
//! A 256-byte register file with an auto-incrementing cursor, plus a
//! single-shot measurement that completes [`MEASUREMENT_TIME`] after it was
//! started. Completed distances follow a bounded random walk.

use super::{
    DEFAULT_DISTANCE_MM, GPIO_HV_MUX_ACTIVE_HIGH, IDENTIFICATION_MODEL_ID,
    IDENTIFICATION_REVISION_ID, MAX_DISTANCE_MM, MEASUREMENT_TIME, MIN_DISTANCE_MM, MODEL_ID,
    RESULT_INTERRUPT_STATUS, RESULT_RANGE_VAL, REVISION_ID, START_SINGLE, STATUS_DATA_READY,
    SYSRANGE_START,
};
use crate::common::{from_millis, Instant};
use crate::i2c::common::Direction;
use crate::i2c::traits::RegisterTarget;
use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

/// Largest change between two consecutive distances, in millimetres.
const WALK_STEP_MM: i32 = 50;

/// Byte-addressed register file with a wrapping cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterFile {
    bytes: [u8; 256],
    cursor: u8,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: [0; 256],
            cursor: 0,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    pub fn select(&mut self, register: u8) {
        self.cursor = register;
    }

    #[must_use]
    pub fn get(&self, register: u8) -> u8 {
        self.bytes.get(usize::from(register)).copied().unwrap_or(0)
    }

    pub fn set(&mut self, register: u8, value: u8) {
        if let Some(slot) = self.bytes.get_mut(usize::from(register)) {
            *slot = value;
        }
    }

    /// Reads at the cursor and moves it on, 0xFF wrapping to 0x00.
    pub fn read_next(&mut self) -> u8 {
        let value = self.get(self.cursor);
        self.advance();
        value
    }

    /// Writes at the cursor and moves it on, 0xFF wrapping to 0x00.
    pub fn write_next(&mut self, value: u8) {
        self.set(self.cursor, value);
        self.advance();
    }

    fn advance(&mut self) {
        self.cursor = self.cursor.wrapping_add(1);
    }
}

/// Measurement progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Measuring,
    Complete,
}

/// Register-level model of the sensor.
pub struct VirtualPeripheral<R = SmallRng> {
    registers: RegisterFile,
    phase: Phase,
    /// Stamped by the first `advance_time` after the start was written.
    started_at: Option<Instant>,
    distance_mm: u16,
    rng: R,
}

impl VirtualPeripheral<SmallRng> {
    /// Sensor whose distance walk is reproducible from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> VirtualPeripheral<R> {
    /// Sensor in its power-on state drawing distances from `rng`.
    pub fn with_rng(rng: R) -> Self {
        let mut registers = RegisterFile::new();
        registers.set(IDENTIFICATION_MODEL_ID, MODEL_ID);
        registers.set(IDENTIFICATION_REVISION_ID, REVISION_ID);
        registers.set(GPIO_HV_MUX_ACTIVE_HIGH, 0x01);
        let mut sensor = Self {
            registers,
            phase: Phase::Idle,
            started_at: None,
            distance_mm: DEFAULT_DISTANCE_MM,
            rng,
        };
        sensor.publish_distance();
        sensor
    }

    /// Replaces the current distance, clamped to the reportable range.
    #[must_use]
    pub fn with_distance(mut self, distance_mm: u16) -> Self {
        self.distance_mm = distance_mm.clamp(MIN_DISTANCE_MM, MAX_DISTANCE_MM);
        self.publish_distance();
        self
    }

    /// Distance the next completed measurement will report.
    #[must_use]
    pub fn distance_mm(&self) -> u16 {
        self.distance_mm
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    fn publish_distance(&mut self) {
        let [high, low] = self.distance_mm.to_be_bytes();
        self.registers.set(RESULT_RANGE_VAL, high);
        self.registers.set(RESULT_RANGE_VAL.wrapping_add(1), low);
    }

    /// The start bit never sticks: a start request leaves SYSRANGE_START at
    /// zero and only arms a measurement when none is running.
    fn store(&mut self, register: u8, value: u8) {
        if register != SYSRANGE_START || value & START_SINGLE == 0 {
            self.registers.set(register, value);
            return;
        }
        self.registers.set(SYSRANGE_START, 0);
        if self.phase == Phase::Measuring {
            trace!("vl53l0x: start ignored, measurement running");
            return;
        }
        self.phase = Phase::Measuring;
        self.started_at = None;
        self.registers.set(RESULT_INTERRUPT_STATUS, 0);
        debug!("vl53l0x: measurement started");
    }

    fn complete(&mut self) {
        self.publish_distance();
        self.registers.set(RESULT_INTERRUPT_STATUS, STATUS_DATA_READY);
        self.phase = Phase::Complete;
        debug!("vl53l0x: measurement complete, {} mm", self.distance_mm);

        let step = self.rng.gen_range(-WALK_STEP_MM..=WALK_STEP_MM);
        let next = (i32::from(self.distance_mm) + step)
            .clamp(i32::from(MIN_DISTANCE_MM), i32::from(MAX_DISTANCE_MM));
        self.distance_mm = u16::try_from(next).unwrap_or(MAX_DISTANCE_MM);
    }
}

impl<R: RngCore> RegisterTarget for VirtualPeripheral<R> {
    fn on_transaction_start(&mut self, direction: Direction, repeated: bool) {
        trace!("vl53l0x: {direction:?} transaction, repeated: {repeated}");
    }

    fn on_register_select(&mut self, register: u8) {
        trace!("vl53l0x: select {register:#04x}");
        self.registers.select(register);
    }

    fn on_register_write(&mut self, value: u8) {
        let register = self.registers.cursor();
        self.registers.advance();
        trace!("vl53l0x: write {register:#04x} = {value:#04x}");
        self.store(register, value);
    }

    fn on_register_read(&mut self) -> u8 {
        let register = self.registers.cursor();
        let value = self.registers.read_next();
        if register == RESULT_INTERRUPT_STATUS && value == STATUS_DATA_READY {
            self.registers.set(RESULT_INTERRUPT_STATUS, 0);
        }
        trace!("vl53l0x: read {register:#04x} = {value:#04x}");
        value
    }

    fn advance_time(&mut self, now: Instant) {
        if self.phase != Phase::Measuring {
            return;
        }
        let started = *self.started_at.get_or_insert(now);
        let elapsed = now.checked_duration_since(started);
        if elapsed.is_some_and(|elapsed| elapsed >= from_millis(MEASUREMENT_TIME)) {
            self.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vl53l0x::{RESULT_RANGE_STATUS, SYSTEM_INTERRUPT_CLEAR};
    use hex_literal::hex;

    fn at(millis: u64) -> Instant {
        Instant::from_ticks(millis * 1_000)
    }

    fn read_from<R: RngCore>(sensor: &mut VirtualPeripheral<R>, register: u8, out: &mut [u8]) {
        sensor.on_register_select(register);
        for byte in out.iter_mut() {
            *byte = sensor.on_register_read();
        }
    }

    #[test]
    fn test_power_on_registers() {
        let sensor = VirtualPeripheral::new(1);
        let registers = sensor.registers();
        assert_eq!(registers.get(IDENTIFICATION_MODEL_ID), 0xEE);
        assert_eq!(registers.get(IDENTIFICATION_REVISION_ID), 0x10);
        assert_eq!(registers.get(GPIO_HV_MUX_ACTIVE_HIGH), 0x01);
        assert_eq!(registers.get(RESULT_INTERRUPT_STATUS), 0x00);
        assert_eq!(registers.get(RESULT_RANGE_STATUS), 0x00);
        assert_eq!(sensor.phase(), Phase::Idle);

        let mut sensor = sensor;
        let mut distance = [0u8; 2];
        read_from(&mut sensor, RESULT_RANGE_VAL, &mut distance);
        assert_eq!(distance, hex!("03e8"));
    }

    #[test]
    fn test_select_write_select_read() {
        let mut sensor = VirtualPeripheral::new(1);
        sensor.on_register_select(SYSTEM_INTERRUPT_CLEAR);
        sensor.on_register_write(0x5A);
        sensor.on_register_write(0xA5);
        assert_eq!(sensor.registers().cursor(), SYSTEM_INTERRUPT_CLEAR + 2);

        let mut back = [0u8; 2];
        read_from(&mut sensor, SYSTEM_INTERRUPT_CLEAR, &mut back);
        assert_eq!(back, hex!("5aa5"));
    }

    #[test]
    fn test_cursor_wraps() {
        let mut registers = RegisterFile::new();
        registers.set(0xFF, 0x11);
        registers.set(0x00, 0x22);
        registers.select(0xFE);
        let read: [u8; 3] = core::array::from_fn(|_| registers.read_next());
        assert_eq!(read, hex!("001122"));
        assert_eq!(registers.cursor(), 0x01);

        registers.select(0xFF);
        registers.write_next(0x33);
        registers.write_next(0x44);
        assert_eq!(registers.get(0xFF), 0x33);
        assert_eq!(registers.get(0x00), 0x44);
    }

    #[test]
    fn test_distance_is_big_endian() {
        let mut sensor = VirtualPeripheral::new(7).with_distance(523);
        sensor.on_register_select(RESULT_RANGE_VAL);
        assert_eq!(sensor.on_register_read(), 0x02);
        assert_eq!(sensor.on_register_read(), 0x0B);
    }

    #[test]
    fn test_measurement_cycle() {
        let mut sensor = VirtualPeripheral::new(42).with_distance(523);
        sensor.advance_time(at(5));
        sensor.on_register_select(SYSRANGE_START);
        sensor.on_register_write(START_SINGLE);
        assert_eq!(sensor.phase(), Phase::Measuring);
        assert_eq!(sensor.registers().get(SYSRANGE_START), 0x00);

        sensor.advance_time(at(10));
        sensor.advance_time(at(84));
        assert_eq!(sensor.phase(), Phase::Measuring);
        assert_eq!(sensor.registers().get(RESULT_INTERRUPT_STATUS), 0x00);

        sensor.advance_time(at(85));
        assert_eq!(sensor.phase(), Phase::Complete);
        let mut distance = [0u8; 2];
        read_from(&mut sensor, RESULT_RANGE_VAL, &mut distance);
        assert_eq!(u16::from_be_bytes(distance), 523);

        let next = sensor.distance_mm();
        assert!((473..=573).contains(&next));

        sensor.on_register_select(RESULT_INTERRUPT_STATUS);
        assert_eq!(sensor.on_register_read(), STATUS_DATA_READY);
        sensor.on_register_select(RESULT_INTERRUPT_STATUS);
        assert_eq!(sensor.on_register_read(), 0x00);
    }

    #[test]
    fn test_start_ignored_while_measuring() {
        let mut sensor = VirtualPeripheral::new(3);
        sensor.on_register_select(SYSRANGE_START);
        sensor.on_register_write(START_SINGLE);
        sensor.advance_time(at(0));
        sensor.advance_time(at(50));

        sensor.on_register_select(SYSRANGE_START);
        sensor.on_register_write(START_SINGLE);
        assert_eq!(sensor.registers().get(SYSRANGE_START), 0x00);

        // The first start still completes on its own schedule.
        sensor.advance_time(at(75));
        assert_eq!(sensor.phase(), Phase::Complete);
        sensor.advance_time(at(160));
        sensor.on_register_select(SYSRANGE_START);
        assert_eq!(sensor.on_register_read(), 0x00);
    }

    #[test]
    fn test_read_callbacks_wrap_cursor() {
        let mut sensor = VirtualPeripheral::new(9);
        sensor.on_register_select(0xFE);
        sensor.on_register_write(0x11);
        sensor.on_register_write(0x22);
        assert_eq!(sensor.registers().cursor(), 0x00);

        sensor.on_register_select(0xFC);
        let read: [u8; 6] = core::array::from_fn(|_| sensor.on_register_read());
        assert_eq!(sensor.registers().cursor(), 0x02);
        assert_eq!(&read[2..4], &hex!("1122"));
        assert_eq!(read[4], sensor.registers().get(0x00));
        assert_eq!(read[5], sensor.registers().get(0x01));
    }

    #[test]
    fn test_walk_stays_in_range() {
        let mut sensor = VirtualPeripheral::new(0xDEAD_BEEF).with_distance(MIN_DISTANCE_MM);
        let mut now = 0;
        for _ in 0..500 {
            sensor.on_register_select(SYSRANGE_START);
            sensor.on_register_write(START_SINGLE);
            sensor.advance_time(at(now));
            now += 75;
            sensor.advance_time(at(now));
            assert_eq!(sensor.phase(), Phase::Complete);
            let distance = sensor.distance_mm();
            assert!((MIN_DISTANCE_MM..=MAX_DISTANCE_MM).contains(&distance));
        }
    }

    #[test]
    fn test_with_distance_clamps() {
        assert_eq!(VirtualPeripheral::new(0).with_distance(5).distance_mm(), 100);
        assert_eq!(
            VirtualPeripheral::new(0).with_distance(9_000).distance_mm(),
            2000
        );
    }
}
