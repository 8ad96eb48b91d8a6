//! Push button controller
//!
//! `ButtonController` owns the `GpioChannel` of the button pin and the
//! `EdgeWatcher` waiting on it. It is built once, either ends up `Connected`
//! or `Failed`, and is then driven by calling `poll_once` from a worker
//! thread until that returns `false`.
//!
//! Press counters live behind a `StatusHandle` so the host can take
//! snapshots and reset them while the worker is blocked in an edge wait.
//!
//! ```rust
//! use gpio_button::{ButtonConfig, ButtonController, GpioValue};
//! use gpio_button::dummy::DummyFs;
//! use std::time::Duration;
//!
//! let fs = DummyFs::new();
//! let config = ButtonConfig::new(17);
//! let mut button = ButtonController::new(fs.clone(), &config)
//!     .with_settle_delay(Duration::from_millis(0));
//! assert!(button.status().connected);
//!
//! fs.script().push_edge(GpioValue::High);
//! assert!(button.poll_once());
//! assert_eq!(button.status().press_count, 1);
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::config::ButtonConfig;
use super::sysfs::{EdgeError, GpioChannel, PinFs, SysFs, SysFsPaths};
use super::watcher::{EdgeWatcher, WaitError};
use super::{GpioDirection, GpioEdge, GpioValue};

/// Pause after each press, bounds the event rate
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Presses reported at `info` level before falling back to `debug`
pub const PRESS_EVENT_LIMIT: u32 = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ButtonState {
    Unbound,
    Connecting,
    Connected,
    Failed,
}

/// Point-in-time copy of the button status
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ButtonStatus {
    pub connected: bool,
    pub pin: u32,
    pub press_count: u32,
    pub last_read: u8,
    pub last_write: u8,
}

#[derive(Debug, Default)]
struct SharedStatus {
    status: ButtonStatus,
    press_events: u32,
}

/// Status shared between the worker and the host
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<SharedStatus>>,
}

impl StatusHandle {
    #[inline]
    fn lock(&self) -> MutexGuard<SharedStatus> {
        // every field stays meaningful even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent copy of all fields
    pub fn snapshot(&self) -> ButtonStatus {
        self.lock().status
    }

    /// Zero the counters and re-arm press reporting.
    ///
    /// Connection state and pin are left alone, no hardware is touched.
    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.status.press_count = 0;
        shared.status.last_read = 0;
        shared.status.last_write = 0;
        shared.press_events = 0;
    }

    fn set_connected(&self, pin: u32, connected: bool) {
        let mut shared = self.lock();
        shared.status.pin = pin;
        shared.status.connected = connected;
    }

    fn set_last_read(&self, level: GpioValue) {
        self.lock().status.last_read = level.into();
    }

    /// Count one press, returns whether it should be reported at `info`
    fn record_press(&self, level: GpioValue) -> (u32, bool) {
        let mut shared = self.lock();
        shared.status.press_count = shared.status.press_count.wrapping_add(1);
        shared.status.last_read = level.into();
        let loud = shared.press_events < PRESS_EVENT_LIMIT;
        if loud {
            shared.press_events += 1;
        }
        (shared.status.press_count, loud)
    }
}

/// Counts presses of a button wired to one GPIO input
pub struct ButtonController<F: PinFs = SysFs> {
    channel: GpioChannel<F>,
    watcher: Option<EdgeWatcher>,
    state: ButtonState,
    status: StatusHandle,
    settle_delay: Duration,
}

impl<F: PinFs> fmt::Debug for ButtonController<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ButtonController")
            .field("pin", &self.channel.pin())
            .field("state", &self.state)
            .field("status", &self.status.snapshot())
            .finish()
    }
}

impl ButtonController<SysFs> {
    /// Controller on the real sysfs tree
    pub fn from_config(config: &ButtonConfig) -> ButtonController<SysFs> {
        ButtonController::new(SysFs, config)
    }
}

impl<F: PinFs> ButtonController<F> {
    /// Bind the configured pin and arm it for both edges.
    ///
    /// Failures are logged once and leave the controller `Failed`, there is
    /// no retry. Check `state()` or the status snapshot for the outcome.
    pub fn new(fs: F, config: &ButtonConfig) -> ButtonController<F> {
        let mut controller = ButtonController {
            channel: GpioChannel::new(fs, config.paths.clone()),
            watcher: None,
            state: ButtonState::Unbound,
            status: StatusHandle::default(),
            settle_delay: SETTLE_DELAY,
        };
        controller.status.set_connected(config.pin, false);
        controller.connect(config.pin);
        controller
    }

    /// Override the pause taken after each press
    pub fn with_settle_delay(mut self, delay: Duration) -> ButtonController<F> {
        self.settle_delay = delay;
        self
    }

    fn connect(&mut self, pin: u32) {
        self.state = ButtonState::Connecting;

        if let Err(err) = self.channel.bind(pin, GpioDirection::Input) {
            error!(pin, error = %err, "failed to open GPIO");
            self.state = ButtonState::Failed;
            return;
        }

        if let Err(err) = self.channel.set_edge(GpioEdge::Both) {
            match err {
                EdgeError::Unsupported(..) => {
                    warn!(pin, error = %err, "failed to set GPIO edge")
                }
                _ => error!(pin, error = %err, "failed to set GPIO edge"),
            }
            self.channel.release();
            self.state = ButtonState::Failed;
            return;
        }

        let mut watcher = EdgeWatcher::new(GpioEdge::Both);
        let baseline = match self.channel.value_handle() {
            Some(value) => watcher.prime_baseline(value),
            None => {
                self.state = ButtonState::Failed;
                return;
            }
        };
        match baseline {
            Ok(level) => {
                self.status.set_last_read(level);
                self.watcher = Some(watcher);
                self.state = ButtonState::Connected;
                self.status.set_connected(pin, true);
                info!(pin, "successfully connected to GPIO pin");
            }
            Err(err) => {
                error!(pin, error = %err, "failed to read GPIO baseline");
                self.channel.release();
                self.state = ButtonState::Failed;
            }
        }
    }

    /// Wait for the next edge and count it.
    ///
    /// Returns `false` once the controller is not connected, telling the
    /// caller to stop. An invalid descriptor or any other wait failure moves
    /// the controller to `Failed` and closes the value file.
    pub fn poll_once(&mut self) -> bool {
        if self.state != ButtonState::Connected {
            return false;
        }

        let result = match (self.watcher.as_mut(), self.channel.value_handle()) {
            (Some(watcher), Some(value)) => watcher.wait_for_edge(value, None),
            _ => Err(WaitError::DeviceGone),
        };

        match result {
            Ok(level) => {
                let (count, loud) = self.status.record_press(level);
                let value = u8::from(level);
                if loud {
                    info!(pin = self.channel.pin(), count, value, "button pressed");
                } else {
                    debug!(pin = self.channel.pin(), count, value, "button pressed");
                }
            }
            Err(WaitError::TimedOut) => (),
            Err(err) => {
                error!(pin = self.channel.pin(), error = %err, "GPIO wait failed, stop polling");
                self.channel.release();
                self.state = ButtonState::Failed;
                self.status.set_connected(self.channel.pin(), false);
                return false;
            }
        }

        // empty wakes are paced too, a descriptor stuck in POLLERR would spin
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
        true
    }

    /// Zero press count and last levels, see `StatusHandle::reset`
    pub fn reset_status(&self) {
        self.status.reset()
    }

    pub fn status(&self) -> ButtonStatus {
        self.status.snapshot()
    }

    /// Handle for reading and resetting status from another thread
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    #[inline]
    pub fn state(&self) -> ButtonState {
        self.state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ButtonState::Connected
    }

    #[inline]
    pub fn paths(&self) -> &SysFsPaths {
        self.channel.paths()
    }

    #[inline]
    pub fn channel(&self) -> &GpioChannel<F> {
        &self.channel
    }
}
