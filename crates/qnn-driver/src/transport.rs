//! Byte channel abstraction.
//!
//! The wire protocol only needs four things from the link: write bytes,
//! collect up to N bytes before a deadline, drop unread input, and say what
//! it is. Port configuration (baud, framing, raw mode) happens before a
//! transport is constructed.

use crate::error::Result;
use std::fmt::Debug;
use std::time::Duration;

/// Half-duplex byte channel to the accelerator
pub trait Transport: Debug + Send {
    /// Write every byte of `data`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the channel fails.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Fill `buf` with as many bytes as arrive before `timeout` elapses.
    ///
    /// Returns early once `buf` is full. Returns the number of bytes read,
    /// which may be short or zero.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the channel fails.
    fn read_within(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop any unread input; returns the number of bytes discarded.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the channel fails.
    fn discard_input(&mut self) -> Result<usize>;

    /// Transport kind, for logs and reports
    fn transport_type(&self) -> TransportType;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn read_within(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read_within(buf, timeout)
    }

    fn discard_input(&mut self) -> Result<usize> {
        (**self).discard_input()
    }

    fn transport_type(&self) -> TransportType {
        (**self).transport_type()
    }
}

/// Transport identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Pre-configured serial device file
    Serial,
    /// In-process accelerator model, no hardware required
    Simulated,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Simulated => write!(f, "Simulated (software accelerator)"),
        }
    }
}
