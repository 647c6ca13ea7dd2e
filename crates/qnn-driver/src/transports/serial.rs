//! Serial device-file transport.
//!
//! Opens an already-configured tty (or any readable/writable device file)
//! non-blocking and bounds every read with `poll(2)` through rustix. Baud
//! rate and raw mode are set by whoever owns the port, e.g. `stty`.

use crate::error::{QnnError, Result};
use crate::transport::{Transport, TransportType};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fs::OFlags;
use rustix::io::Errno;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Draining stale input never waits for more
const DRAIN_POLL: Duration = Duration::ZERO;

/// Transport over a serial device file
#[derive(Debug)]
pub struct SerialTransport {
    path: PathBuf,
    file: File,
}

impl SerialTransport {
    /// Open `path` for non-blocking read/write.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the path does not exist, or `Io`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(QnnError::device_not_found(path));
        }

        #[allow(clippy::cast_possible_wrap)]
        let nonblock_flag = (OFlags::NONBLOCK | OFlags::NOCTTY).bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nonblock_flag)
            .open(path)?;

        tracing::info!("Opened serial device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Device path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait up to `timeout` for `flags`; true if ready
    fn wait(&self, flags: PollFlags, timeout: Duration) -> Result<bool> {
        poll_until(Instant::now() + timeout, |ms| {
            let mut fds = [PollFd::new(&self.file, flags)];
            poll(&mut fds, ms)
        })
    }
}

/// Run `poll_once` with the time left before `deadline`, restarting it when
/// a signal interrupts the wait.
fn poll_until(
    deadline: Instant,
    mut poll_once: impl FnMut(i32) -> rustix::io::Result<usize>,
) -> Result<bool> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let ms = i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX);
        match poll_once(ms) {
            Ok(n) => return Ok(n > 0),
            Err(Errno::INTR) if !remaining.is_zero() => {
                tracing::trace!("poll interrupted, {ms} ms left");
            }
            Err(Errno::INTR) => return Ok(false),
            Err(e) => return Err(QnnError::transport(format!("poll failed: {e}"))),
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            match rustix::io::write(&self.file, data) {
                Ok(0) => return Err(QnnError::transport("device accepted no bytes")),
                Ok(n) => data = &data[n..],
                Err(Errno::AGAIN | Errno::INTR) => {
                    self.wait(PollFlags::OUT, Duration::from_millis(100))?;
                }
                Err(e) => return Err(QnnError::transport(format!("write failed: {e}"))),
            }
        }
        Ok(())
    }

    fn read_within(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            match rustix::io::read(&self.file, &mut buf[filled..]) {
                Ok(0) => return Err(QnnError::transport("device closed")),
                Ok(n) => {
                    filled += n;
                    continue;
                }
                Err(Errno::AGAIN | Errno::INTR) => {}
                Err(e) => return Err(QnnError::transport(format!("read failed: {e}"))),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait(PollFlags::IN, remaining)? {
                break;
            }
        }
        Ok(filled)
    }

    fn discard_input(&mut self) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut dropped = 0;
        loop {
            let n = self.read_within(&mut scratch, DRAIN_POLL)?;
            dropped += n;
            if n < scratch.len() {
                return Ok(dropped);
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }
}
