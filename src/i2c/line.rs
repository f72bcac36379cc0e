// Licensed under the Apache-2.0 license

//! Open-drain line handling.
//!
//! I2C lines are wired-AND: a participant either pulls a line low or lets the
//! pull-up take it high. [`OpenDrain`] wraps a pin with exactly that model.
//! `set_high` on the wrapped pin means "release", `set_low` means "drive low".
//!
//! Driving is scoped. [`OpenDrain::transmit`] hands out a [`Transmit`] guard
//! that mutably borrows the line, so the line cannot be sampled while the
//! guard is alive, and dropping the guard releases the line. Forgetting to
//! switch back to input before reading an ACK is therefore a compile error,
//! and an early return on a timeout can never leave the line held low.
//!
//! Hosts whose GPIO API ties direction to a claimed handle (claim as input,
//! claim as output) plug in through [`LineDriver`] and [`ReclaimingLine`].

use crate::i2c::common::{AckBit, AckSampling, BusConfig};
use core::fmt;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};

/// A pin used as an open-drain I2C line.
#[derive(Debug)]
pub struct OpenDrain<P> {
    pin: P,
}

impl<P, E> OpenDrain<P>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    /// Takes the pin and releases it.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the release fails.
    pub fn new(mut pin: P) -> Result<Self, E> {
        pin.set_high()?;
        Ok(Self { pin })
    }

    /// Samples the line level.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the read fails.
    pub fn is_high(&mut self) -> Result<bool, E> {
        self.pin.is_high()
    }

    /// Lets the pull-up take the line.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the write fails.
    pub fn release(&mut self) -> Result<(), E> {
        self.pin.set_high()
    }

    /// Starts driving. The line stays released until [`Transmit::set`].
    pub fn transmit(&mut self) -> Transmit<'_, P> {
        Transmit {
            pin: &mut self.pin,
            released: false,
        }
    }

    /// Takes `samples` reads spaced one microsecond apart and decides the
    /// acknowledge bit by majority.
    ///
    /// # Errors
    ///
    /// Returns the pin error if a read fails.
    pub fn sample_ack<D: DelayNs>(
        &mut self,
        delay: &mut D,
        sampling: AckSampling,
    ) -> Result<AckBit, E> {
        let mut low_reads = 0u8;
        for n in 0..sampling.samples() {
            if n > 0 {
                delay.delay_us(1);
            }
            if self.pin.is_low()? {
                low_reads += 1;
            }
        }
        Ok(sampling.decide(low_reads))
    }

    /// Drives or releases without a guard.
    ///
    /// For state machines that hold a level across several calls. Whoever
    /// uses this owns releasing the line again.
    pub(crate) fn hold(&mut self, level: bool) -> Result<(), E> {
        if level {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }

    /// Returns the wrapped pin.
    pub fn free(self) -> P {
        self.pin
    }
}

/// Scoped drive access to an [`OpenDrain`] line. Releases the line on drop.
pub struct Transmit<'a, P: OutputPin> {
    pin: &'a mut P,
    released: bool,
}

impl<P: OutputPin> Transmit<'_, P> {
    /// Puts `level` on the line: low drives, high releases.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the write fails.
    pub fn set(&mut self, level: bool) -> Result<(), P::Error> {
        if level {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }

    /// Releases the line and reports the outcome, which dropping cannot.
    ///
    /// # Errors
    ///
    /// Returns the pin error if the release fails.
    pub fn finish(mut self) -> Result<(), P::Error> {
        self.released = true;
        self.pin.set_high()
    }
}

impl<P: OutputPin> Drop for Transmit<'_, P> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.pin.set_high();
        }
    }
}

/// Direction a line is claimed in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineDirection {
    Input,
    Output,
}

/// Pull resistor setting requested with a claim.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bias {
    Disabled,
    PullUp,
}

/// Parameters of a single line claim.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineRequest {
    pub direction: LineDirection,
    pub bias: Bias,
    pub open_drain: bool,
    /// Initial output value, ignored for inputs.
    pub initial: bool,
}

impl LineRequest {
    #[must_use]
    pub fn input(bias: Bias) -> Self {
        Self {
            direction: LineDirection::Input,
            bias,
            open_drain: false,
            initial: true,
        }
    }

    #[must_use]
    pub fn output(initial: bool) -> Self {
        Self {
            direction: LineDirection::Output,
            bias: Bias::Disabled,
            open_drain: false,
            initial,
        }
    }

    #[must_use]
    pub fn open_drain(bias: Bias) -> Self {
        Self {
            direction: LineDirection::Output,
            bias,
            open_drain: true,
            initial: true,
        }
    }
}

/// Host GPIO access that hands out per-line handles.
///
/// Implementations are typically a cheap handle onto a shared chip, so that
/// several [`ReclaimingLine`]s can each own one.
pub trait LineDriver {
    type Handle;
    type Error: fmt::Debug;

    /// Claims `pin` with the given request.
    ///
    /// # Errors
    ///
    /// Returns the host error if the line is busy or the request is refused.
    fn claim(&mut self, pin: u32, request: LineRequest) -> Result<Self::Handle, Self::Error>;

    /// Reads the current level through a handle.
    ///
    /// # Errors
    ///
    /// Returns the host error if the read fails.
    fn read(&mut self, handle: &mut Self::Handle) -> Result<bool, Self::Error>;

    /// Sets the output value through a handle.
    ///
    /// # Errors
    ///
    /// Returns the host error if the write fails.
    fn write(&mut self, handle: &mut Self::Handle, value: bool) -> Result<(), Self::Error>;

    /// Gives the line back to the host.
    fn release(&mut self, handle: Self::Handle);
}

/// Error from a [`ReclaimingLine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineError<E> {
    /// The host driver failed.
    Driver(E),
    /// A previous re-claim failed and the line has no handle.
    Unclaimed,
}

impl<E: fmt::Debug> digital::Error for LineError<E> {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Drive {
    /// Switch direction by releasing and re-claiming the handle.
    Reclaim,
    /// Claimed once as open-drain output; only the value changes.
    OpenDrain,
}

/// Adapts a [`LineDriver`] line to the embedded-hal pin traits.
///
/// Releasing re-claims the line as an input with pull-up, driving low
/// re-claims it as an output at 0. When the host supports open-drain outputs,
/// [`ReclaimingLine::open_drain`] claims once and only changes the value.
pub struct ReclaimingLine<D: LineDriver> {
    driver: D,
    pin: u32,
    handle: Option<D::Handle>,
    direction: LineDirection,
    drive: Drive,
}

impl<D: LineDriver> ReclaimingLine<D> {
    /// Claims `pin` as a released input.
    ///
    /// # Errors
    ///
    /// Returns the host error if the claim fails.
    pub fn new(mut driver: D, pin: u32) -> Result<Self, LineError<D::Error>> {
        let handle = driver
            .claim(pin, LineRequest::input(Bias::PullUp))
            .map_err(LineError::Driver)?;
        Ok(Self {
            driver,
            pin,
            handle: Some(handle),
            direction: LineDirection::Input,
            drive: Drive::Reclaim,
        })
    }

    /// Claims `pin` once as an open-drain output, initially released.
    ///
    /// # Errors
    ///
    /// Returns the host error if the claim fails.
    pub fn open_drain(mut driver: D, pin: u32) -> Result<Self, LineError<D::Error>> {
        let handle = driver
            .claim(pin, LineRequest::open_drain(Bias::PullUp))
            .map_err(LineError::Driver)?;
        Ok(Self {
            driver,
            pin,
            handle: Some(handle),
            direction: LineDirection::Output,
            drive: Drive::OpenDrain,
        })
    }

    #[must_use]
    pub fn pin(&self) -> u32 {
        self.pin
    }

    #[must_use]
    pub fn direction(&self) -> LineDirection {
        self.direction
    }

    fn reclaim(&mut self, request: LineRequest) -> Result<(), LineError<D::Error>> {
        if let Some(handle) = self.handle.take() {
            self.driver.release(handle);
        }
        let handle = self
            .driver
            .claim(self.pin, request)
            .map_err(LineError::Driver)?;
        self.handle = Some(handle);
        self.direction = request.direction;
        Ok(())
    }

    /// Gives the line back to the host and returns the driver.
    pub fn free(mut self) -> D {
        if let Some(handle) = self.handle.take() {
            self.driver.release(handle);
        }
        self.driver
    }
}

/// Claims the clock and data lines named by `config` as released inputs.
///
/// Returns `(scl, sda)`, ready for the master or a slave engine.
///
/// # Errors
///
/// Returns the host error if either claim fails. A clock line claimed before
/// the data claim failed is released again.
pub fn claim_lines<D: LineDriver + Clone>(
    driver: D,
    config: &BusConfig,
) -> Result<(ReclaimingLine<D>, ReclaimingLine<D>), LineError<D::Error>> {
    let scl = ReclaimingLine::new(driver.clone(), config.clock_pin)?;
    match ReclaimingLine::new(driver, config.data_pin) {
        Ok(sda) => Ok((scl, sda)),
        Err(error) => {
            let _ = scl.free();
            Err(error)
        }
    }
}

impl<D: LineDriver> ErrorType for ReclaimingLine<D> {
    type Error = LineError<D::Error>;
}

impl<D: LineDriver> InputPin for ReclaimingLine<D> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let handle = self.handle.as_mut().ok_or(LineError::Unclaimed)?;
        self.driver.read(handle).map_err(LineError::Driver)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

impl<D: LineDriver> OutputPin for ReclaimingLine<D> {
    fn set_high(&mut self) -> Result<(), Self::Error> {
        match (self.drive, self.direction) {
            (Drive::OpenDrain, _) => {
                let handle = self.handle.as_mut().ok_or(LineError::Unclaimed)?;
                self.driver.write(handle, true).map_err(LineError::Driver)
            }
            (Drive::Reclaim, LineDirection::Input) => Ok(()),
            (Drive::Reclaim, LineDirection::Output) => {
                self.reclaim(LineRequest::input(Bias::PullUp))
            }
        }
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        match (self.drive, self.direction) {
            (Drive::Reclaim, LineDirection::Input) => self.reclaim(LineRequest::output(false)),
            _ => {
                let handle = self.handle.as_mut().ok_or(LineError::Unclaimed)?;
                self.driver.write(handle, false).map_err(LineError::Driver)
            }
        }
    }
}
