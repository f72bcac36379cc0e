// Licensed under the Apache-2.0 license

use core::fmt;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Bus-level failure, generic over the line error `E`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// Nobody acknowledged the address byte.
    AddressNack,
    /// A data byte was not acknowledged after `transferred` bytes were.
    DataNack { transferred: usize },
    /// An expected edge or bus state did not arrive before its deadline.
    Timeout,
    /// The address does not fit in seven bits. Nothing was put on the bus.
    InvalidAddress(u8),
    /// Reading or driving a line failed.
    Line(E),
}

impl<E> Error<E> {
    /// Protocol-level failures leave the lines usable; a line fault does not.
    #[must_use]
    pub fn is_line_fault(&self) -> bool {
        matches!(self, Self::Line(_))
    }
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Self::Line(error)
    }
}

impl<E: fmt::Debug> embedded_hal::i2c::Error for Error<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Self::DataNack { .. } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Self::Timeout => ErrorKind::Bus,
            Self::InvalidAddress(_) | Self::Line(_) => ErrorKind::Other,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressNack => f.write_str("address not acknowledged"),
            Self::DataNack { transferred } => {
                write!(f, "data not acknowledged after {transferred} bytes")
            }
            Self::Timeout => f.write_str("timed out waiting for the bus"),
            Self::InvalidAddress(address) => {
                write!(f, "address {address:#04x} is not a 7-bit address")
            }
            Self::Line(e) => write!(f, "line error: {e:?}"),
        }
    }
}
