//! Edge interrupt wait
//!
//! An `EdgeWatcher` does not own the value file it waits on. The owner of the
//! `GpioChannel` lends the handle for every call, so the watcher can never
//! outlive or close it.
//!
//! Reading a sysfs value file leaves the file offset at the end of the
//! attribute, after which further reads return nothing. `read_level` therefore
//! always seeks back to the start first.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;
use tracing::trace;

use super::sysfs::{GpioError, GpioResult};
use super::{GpioEdge, GpioValue, ValueFile, Wakeup};

quick_error! {
    #[derive(Debug)]
    pub enum WaitError {
        TimedOut {
            description("no edge before the timeout")
            display("no edge before the timeout")
        }
        DeviceGone {
            description("value file descriptor is no longer valid")
            display("value file descriptor is no longer valid")
        }
        Gpio(err: GpioError) {
            from()
            description("gpio error")
            display("GPIO error: {}", err)
            cause(err)
        }
    }
}

/// Rewind `value` and read the logic level it reports
pub fn read_level<V: Read + Seek + ?Sized>(value: &mut V) -> GpioResult<GpioValue> {
    // the attribute is "0\n" or "1\n", one spare byte catches garbage
    let mut buf: [u8; 3] = [0; 3];

    value.seek(SeekFrom::Start(0))?;
    let count = value.read(&mut buf)?;

    match buf[..count].first() {
        Some(b'0') => Ok(GpioValue::Low),
        Some(b'1') => Ok(GpioValue::High),
        Some(&val) => Err(GpioError::InvalidData(val)),
        None => Err(GpioError::EmptyRead),
    }
}

/// Waits for edges on a borrowed value file and tracks the last level seen
#[derive(Debug)]
pub struct EdgeWatcher {
    edge: GpioEdge,
    last_level: Option<GpioValue>,
}

impl EdgeWatcher {
    pub fn new(edge: GpioEdge) -> EdgeWatcher {
        EdgeWatcher {
            edge,
            last_level: None,
        }
    }

    #[inline]
    pub fn edge(&self) -> GpioEdge {
        self.edge
    }

    /// Level of the most recent successful read
    #[inline]
    pub fn last_level(&self) -> Option<GpioValue> {
        self.last_level
    }

    /// Read the starting level without waiting.
    ///
    /// Must run once before the first `wait_for_edge`: a freshly opened sysfs
    /// value file reports a pending urgent condition until it has been read.
    pub fn prime_baseline<V: ValueFile + ?Sized>(&mut self, value: &mut V) -> GpioResult<GpioValue> {
        let level = read_level(value)?;
        self.last_level = Some(level);
        Ok(level)
    }

    /// Block until an edge interrupt arrives, then return the new level.
    ///
    /// `None` waits forever. A wake without an edge is reported as
    /// `WaitError::TimedOut`, the caller treats both as an empty iteration.
    pub fn wait_for_edge<V: ValueFile + ?Sized>(
        &mut self,
        value: &mut V,
        timeout: Option<Duration>,
    ) -> Result<GpioValue, WaitError> {
        match value.wait_urgent(timeout)? {
            Wakeup::Edge => {
                let level = read_level(value)?;
                self.last_level = Some(level);
                Ok(level)
            }
            Wakeup::TimedOut => Err(WaitError::TimedOut),
            Wakeup::Spurious => {
                trace!("woken without an edge");
                Err(WaitError::TimedOut)
            }
            Wakeup::Gone => Err(WaitError::DeviceGone),
        }
    }
}
