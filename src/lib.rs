//! GPIO push button driver
//!
//! The crate binds a single pin of the [Linux GPIO Sysfs]
//! (https://www.kernel.org/doc/Documentation/gpio/sysfs.txt) interface, arms
//! edge interrupts on it and counts button presses from a dedicated worker
//! thread.
//!
//! The core vocabulary is defined here: `GpioValue`, `GpioEdge`,
//! `GpioDirection`, the `GpioOut`/`GpioIn` traits and the `ValueFile` seam
//! through which edge waits reach the kernel. The pieces built on top are:
//!
//! * `sysfs`: export/unexport lifecycle and control files of one pin
//! * `watcher`: the blocking edge wait and the rewind-then-read of the level
//! * `button`: the controller owning both, plus its shared status
//! * `worker`: the thread that keeps calling the controller
//!
//! `dummy` provides in-memory stand-ins for the filesystem so the whole stack
//! can run without hardware.

#[macro_use]
extern crate quick_error;

use std::fmt;
use std::io::{Read, Seek, Write};
use std::str::FromStr;
use std::time::Duration;

pub mod button;
pub mod config;
pub mod dummy;
pub mod sysfs;
pub mod watcher;
pub mod worker;

pub use button::{ButtonController, ButtonState, ButtonStatus, StatusHandle};
pub use config::ButtonConfig;
pub use sysfs::{GpioChannel, SysFs, SysFsPaths};
pub use watcher::EdgeWatcher;

/// A value read from or written to a GPIO port
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpioValue {
    Low,
    High,
}

impl From<bool> for GpioValue {
    fn from(val: bool) -> GpioValue {
        if val {
            GpioValue::High
        } else {
            GpioValue::Low
        }
    }
}

impl From<u8> for GpioValue {
    fn from(val: u8) -> GpioValue {
        if val != 0 {
            GpioValue::High
        } else {
            GpioValue::Low
        }
    }
}

impl From<GpioValue> for u8 {
    fn from(val: GpioValue) -> u8 {
        match val {
            GpioValue::Low => 0,
            GpioValue::High => 1,
        }
    }
}

/// Which transitions of an input raise an interrupt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpioEdge {
    None,
    Rising,
    Falling,
    Both,
}

impl GpioEdge {
    /// Text understood by the sysfs `edge` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            GpioEdge::None => "none",
            GpioEdge::Rising => "rising",
            GpioEdge::Falling => "falling",
            GpioEdge::Both => "both",
        }
    }
}

impl fmt::Display for GpioEdge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GpioDirection {
    Input,
    Output,
}

impl GpioDirection {
    /// Text understood by the sysfs `direction` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            GpioDirection::Input => "in",
            GpioDirection::Output => "out",
        }
    }
}

impl fmt::Display for GpioDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpioDirection {
    type Err = sysfs::BindError;

    fn from_str(s: &str) -> Result<GpioDirection, Self::Err> {
        match s.trim() {
            "in" => Ok(GpioDirection::Input),
            "out" => Ok(GpioDirection::Output),
            other => Err(sysfs::BindError::InvalidParameter(format!(
                "invalid direction {:?}, value must be \"in\" or \"out\"",
                other
            ))),
        }
    }
}

/// Supports sending `GPIOValue`s
pub trait GpioOut {
    type Error;

    /// Sets the output value of the GPIO port
    #[inline(always)]
    fn set_value<T: Into<GpioValue> + Copy>(&mut self, value: T) -> Result<(), Self::Error> {
        match value.into() {
            GpioValue::High => self.set_high(),
            GpioValue::Low => self.set_low(),
        }
    }

    /// Set the GPIO port to a low output value directly
    fn set_low(&mut self) -> Result<(), Self::Error>;

    /// Set the GPIO port to a high output value directly
    fn set_high(&mut self) -> Result<(), Self::Error>;
}

/// Supports reading `GPIOValue`s
pub trait GpioIn {
    type Error;

    /// Perform a single reading of a GPIO port
    fn read_value(&mut self) -> Result<GpioValue, Self::Error>;
}

/// Outcome of a single urgent wait on a value file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// The kernel flagged an edge interrupt
    Edge,
    /// The timeout elapsed without an interrupt
    TimedOut,
    /// Woken without an edge, e.g. by a signal
    Spurious,
    /// The descriptor is no longer valid
    Gone,
}

/// An open `value` file of a bound pin.
///
/// Besides plain reads and writes, the file can block until the kernel
/// signals an urgent (priority) condition, which is how sysfs reports edge
/// interrupts. Ordinary readability is never used for this, a value file is
/// always readable.
pub trait ValueFile: Read + Write + Seek {
    /// Block until an edge interrupt, or until `timeout` elapses.
    ///
    /// `None` waits forever.
    fn wait_urgent(&mut self, timeout: Option<Duration>) -> sysfs::GpioResult<Wakeup>;
}
