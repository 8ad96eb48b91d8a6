//! Linux `/sys`-fs based GPIO binding
//!
//! Uses the [Linux GPIO Sysfs](https://www.kernel.org/doc/Documentation/gpio/sysfs.txt) filesystem
//! operations to bind a single pin. The `value` file is opened once during `bind` and kept open,
//! every read or write rewinds it first.
//!
//! All paths are built from templates (`SysFsPaths`), a `%d` in a template is replaced by the
//! decimal pin number. The actual file operations go through the `PinFs` trait, `SysFs` being the
//! implementation that touches the real filesystem.

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{GpioDirection, GpioEdge, GpioIn, GpioOut, GpioValue, ValueFile, Wakeup};

/// Highest pin number accepted by `GpioChannel::bind`
pub const MAX_PIN: u32 = 31;

quick_error! {
    #[derive(Debug)]
    pub enum GpioError {
        Io(err: io::Error) {
            from()
            description("io error")
            display("I/O error: {}", err)
            cause(err)
        }
        Poll(err: nix::Error) {
            from()
            description("poll error")
            display("Poll error: {}", err)
            cause(err)
        }
        InvalidData(val: u8) {
            description("read a value that was neither '0' nor '1' from Linux sysfs GPIO interface")
            display("read value {:?} from Linux sysfs GPIO interface, which is neither '0' nor '1'",
                    val)
        }
        EmptyRead {
            description("value file returned no data")
            display("value file returned no data, was it rewound?")
        }
        NotBound {
            description("GPIO channel is not bound")
            display("GPIO channel is not bound")
        }
        WrongDirection(direction: GpioDirection) {
            description("operation does not match the pin direction")
            display("operation not available on a pin bound as {:?}", direction)
        }
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

quick_error! {
    #[derive(Debug)]
    pub enum BindError {
        InvalidParameter(reason: String) {
            description("invalid bind parameter")
            display("Invalid parameter: {}", reason)
        }
        DeviceUnavailable(path: PathBuf, err: io::Error) {
            description("GPIO device file unavailable")
            display("Cannot use {}: {}", path.display(), err)
            cause(err)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum EdgeError {
        Unsupported(path: PathBuf, err: io::Error) {
            description("failed to set edge")
            display("Failed to set edge via {}: {}", path.display(), err)
            cause(err)
        }
        NotBound {
            description("GPIO channel is not bound")
            display("edge requested on an unbound GPIO channel")
        }
        NotInput {
            description("edge requested on an output pin")
            display("edges can only be set on a pin bound as input")
        }
    }
}

fn default_export() -> String {
    "/sys/class/gpio/export".to_owned()
}

fn default_unexport() -> String {
    "/sys/class/gpio/unexport".to_owned()
}

fn default_direction() -> String {
    "/sys/class/gpio/gpio%d/direction".to_owned()
}

fn default_edge() -> String {
    "/sys/class/gpio/gpio%d/edge".to_owned()
}

fn default_value() -> String {
    "/sys/class/gpio/gpio%d/value".to_owned()
}

/// Path templates of the sysfs control files.
///
/// The field names follow the keys of the JSON init file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysFsPaths {
    #[serde(rename = "BTN_DEV_STR_EXPORT", default = "default_export")]
    pub export: String,
    #[serde(rename = "BTN_DEV_STR_UNEXPORT", default = "default_unexport")]
    pub unexport: String,
    #[serde(rename = "BTN_DEV_STR_DIRECTION", default = "default_direction")]
    pub direction: String,
    #[serde(rename = "BTN_DEV_STR_EDGE", default = "default_edge")]
    pub edge: String,
    #[serde(rename = "BTN_DEV_STR_VALUE", default = "default_value")]
    pub value: String,
}

impl Default for SysFsPaths {
    fn default() -> SysFsPaths {
        SysFsPaths {
            export: default_export(),
            unexport: default_unexport(),
            direction: default_direction(),
            edge: default_edge(),
            value: default_value(),
        }
    }
}

#[inline]
fn expand(template: &str, pin: u32) -> PathBuf {
    PathBuf::from(template.replace("%d", &pin.to_string()))
}

impl SysFsPaths {
    /// Templates for a sysfs-like tree rooted somewhere else than `/sys/class/gpio`.
    pub fn under<P: AsRef<Path>>(root: P) -> SysFsPaths {
        let root = root.as_ref().display();
        SysFsPaths {
            export: format!("{}/export", root),
            unexport: format!("{}/unexport", root),
            direction: format!("{}/gpio%d/direction", root),
            edge: format!("{}/gpio%d/edge", root),
            value: format!("{}/gpio%d/value", root),
        }
    }

    pub fn export(&self) -> PathBuf {
        expand(&self.export, 0)
    }

    pub fn unexport(&self) -> PathBuf {
        expand(&self.unexport, 0)
    }

    pub fn direction(&self, pin: u32) -> PathBuf {
        expand(&self.direction, pin)
    }

    pub fn edge(&self, pin: u32) -> PathBuf {
        expand(&self.edge, pin)
    }

    pub fn value(&self, pin: u32) -> PathBuf {
        expand(&self.value, pin)
    }
}

/// File operations needed to bind a pin.
///
/// Control files are opened, written and closed again within a single call,
/// only the value file outlives the call that opened it.
pub trait PinFs {
    type Value: ValueFile;

    /// Open `path` write-only and write `contents` to it
    fn write_control(&mut self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Open the value file, read-only for inputs and write-only for outputs
    fn open_value(&mut self, path: &Path, direction: GpioDirection) -> io::Result<Self::Value>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct SysFs;

impl PinFs for SysFs {
    type Value = fs::File;

    fn write_control(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)?
            .write_all(contents)
    }

    fn open_value(&mut self, path: &Path, direction: GpioDirection) -> io::Result<fs::File> {
        match direction {
            GpioDirection::Input => fs::File::open(path),
            GpioDirection::Output => fs::OpenOptions::new().write(true).open(path),
        }
    }
}

#[inline]
fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => {
            // round up, a sub-millisecond timeout must still block
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
        }
    }
}

impl ValueFile for fs::File {
    fn wait_urgent(&mut self, timeout: Option<Duration>) -> GpioResult<Wakeup> {
        // sysfs signals an edge with POLLPRI | POLLERR
        let mut fds = [PollFd::new(
            self.as_fd(),
            PollFlags::POLLPRI | PollFlags::POLLERR,
        )];

        let count = match poll(&mut fds, poll_timeout(timeout)) {
            Ok(count) => count,
            Err(Errno::EINTR) => return Ok(Wakeup::Spurious),
            Err(err) => return Err(err.into()),
        };
        if count == 0 {
            return Ok(Wakeup::TimedOut);
        }

        let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
        if revents.intersects(PollFlags::POLLNVAL | PollFlags::POLLHUP) {
            Ok(Wakeup::Gone)
        } else if revents.contains(PollFlags::POLLPRI) {
            Ok(Wakeup::Edge)
        } else {
            Ok(Wakeup::Spurious)
        }
    }
}

/// One pin bound through the sysfs interface.
///
/// A channel starts unbound. `bind` exports the pin, writes its direction and
/// opens the value file; the channel counts as bound only once all three
/// succeeded. Dropping the channel closes the value file but leaves the pin
/// exported.
#[derive(Debug)]
pub struct GpioChannel<F: PinFs = SysFs> {
    fs: F,
    paths: SysFsPaths,
    pin: u32,
    direction: GpioDirection,
    edge: Option<GpioEdge>,
    value: Option<F::Value>,
}

impl GpioChannel<SysFs> {
    /// Unbound channel on the real filesystem
    #[inline]
    pub fn open(paths: SysFsPaths) -> GpioChannel<SysFs> {
        GpioChannel::new(SysFs, paths)
    }
}

impl<F: PinFs> GpioChannel<F> {
    pub fn new(fs: F, paths: SysFsPaths) -> GpioChannel<F> {
        GpioChannel {
            fs,
            paths,
            pin: 0,
            direction: GpioDirection::Input,
            edge: None,
            value: None,
        }
    }

    /// Export `pin` and configure it for `direction`.
    ///
    /// Rebinding an already bound channel closes its value file and unexports
    /// the previous pin first. A failed unexport or export is only logged: the
    /// pin may already be in the requested state, and the following open of
    /// the direction file tells whether it is usable.
    pub fn bind(&mut self, pin: u32, direction: GpioDirection) -> Result<(), BindError> {
        if pin > MAX_PIN {
            return Err(BindError::InvalidParameter(format!(
                "invalid GPIO pin {}, value must be in range [0..{}]",
                pin, MAX_PIN
            )));
        }

        if let Some(stale) = self.value.take() {
            // the pin being released is the one the stale handle belongs to,
            // not the one about to be exported
            drop(stale);
            self.edge = None;
            let unexport = self.paths.unexport();
            if let Err(err) = self
                .fs
                .write_control(&unexport, self.pin.to_string().as_bytes())
            {
                warn!(pin = self.pin, path = %unexport.display(), error = %err, "unexport failed");
            }
        }

        self.pin = pin;
        self.direction = direction;

        let export = self.paths.export();
        if let Err(err) = self.fs.write_control(&export, pin.to_string().as_bytes()) {
            warn!(pin, path = %export.display(), error = %err, "export failed, assuming pin is already exported");
        }

        let direction_path = self.paths.direction(pin);
        self.fs
            .write_control(&direction_path, direction.as_str().as_bytes())
            .map_err(|err| BindError::DeviceUnavailable(direction_path, err))?;

        let value_path = self.paths.value(pin);
        let value = self
            .fs
            .open_value(&value_path, direction)
            .map_err(|err| BindError::DeviceUnavailable(value_path, err))?;

        debug!(pin, direction = direction.as_str(), "GPIO bound");
        self.value = Some(value);
        Ok(())
    }

    /// Select which transitions raise an interrupt on an input pin.
    ///
    /// On failure the previously configured edge stays in effect.
    pub fn set_edge(&mut self, edge: GpioEdge) -> Result<(), EdgeError> {
        if !self.is_bound() {
            return Err(EdgeError::NotBound);
        }
        if self.direction != GpioDirection::Input {
            return Err(EdgeError::NotInput);
        }

        let path = self.paths.edge(self.pin);
        self.fs
            .write_control(&path, edge.as_str().as_bytes())
            .map_err(|err| EdgeError::Unsupported(path, err))?;
        self.edge = Some(edge);
        Ok(())
    }

    /// Close the value file, leaving the pin exported and configured
    pub fn release(&mut self) {
        if self.value.take().is_some() {
            debug!(pin = self.pin, "GPIO value file closed");
        }
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }

    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin
    }

    #[inline]
    pub fn direction(&self) -> GpioDirection {
        self.direction
    }

    /// Edge configured through this channel since the last bind
    #[inline]
    pub fn edge(&self) -> Option<GpioEdge> {
        self.edge
    }

    /// The open value file, if bound
    #[inline]
    pub fn value_handle(&mut self) -> Option<&mut F::Value> {
        self.value.as_mut()
    }

    #[inline]
    pub fn paths(&self) -> &SysFsPaths {
        &self.paths
    }

    #[inline]
    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn bound_as(&mut self, direction: GpioDirection) -> GpioResult<&mut F::Value> {
        if self.value.is_some() && self.direction != direction {
            return Err(GpioError::WrongDirection(self.direction));
        }
        self.value.as_mut().ok_or(GpioError::NotBound)
    }
}

impl<F: PinFs> GpioIn for GpioChannel<F> {
    type Error = GpioError;

    #[inline]
    fn read_value(&mut self) -> GpioResult<GpioValue> {
        let value = self.bound_as(GpioDirection::Input)?;
        super::watcher::read_level(value)
    }
}

impl<F: PinFs> GpioOut for GpioChannel<F> {
    type Error = GpioError;

    #[inline]
    fn set_low(&mut self) -> GpioResult<()> {
        let value = self.bound_as(GpioDirection::Output)?;
        value.seek(SeekFrom::Start(0))?;
        value.write_all(b"0")?;
        Ok(())
    }

    #[inline]
    fn set_high(&mut self) -> GpioResult<()> {
        let value = self.bound_as(GpioDirection::Output)?;
        value.seek(SeekFrom::Start(0))?;
        value.write_all(b"1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyFs, FsOp};

    fn channel() -> (DummyFs, GpioChannel<DummyFs>) {
        let fs = DummyFs::new();
        let channel = GpioChannel::new(fs.clone(), SysFsPaths::default());
        (fs, channel)
    }

    #[test]
    fn templates_expand_pin_number() {
        let paths = SysFsPaths::default();
        assert_eq!(
            paths.direction(17),
            PathBuf::from("/sys/class/gpio/gpio17/direction")
        );
        assert_eq!(paths.edge(4), PathBuf::from("/sys/class/gpio/gpio4/edge"));
        assert_eq!(paths.value(0), PathBuf::from("/sys/class/gpio/gpio0/value"));
        assert_eq!(paths.export(), PathBuf::from("/sys/class/gpio/export"));
    }

    #[test]
    fn out_of_range_pin_is_rejected() {
        for pin in [32, 33, 100, u32::MAX] {
            let (fs, mut channel) = channel();
            match channel.bind(pin, GpioDirection::Input) {
                Err(BindError::InvalidParameter(_)) => (),
                other => panic!("unexpected bind result {:?}", other),
            }
            assert!(!channel.is_bound());
            assert!(fs.ops().is_empty());
        }
    }

    #[test]
    fn bind_runs_export_direction_value_in_order() {
        let (fs, mut channel) = channel();
        channel.bind(17, GpioDirection::Input).unwrap();

        assert!(channel.is_bound());
        assert_eq!(
            fs.ops(),
            vec![
                FsOp::write("/sys/class/gpio/export", "17"),
                FsOp::write("/sys/class/gpio/gpio17/direction", "in"),
                FsOp::OpenValue(
                    PathBuf::from("/sys/class/gpio/gpio17/value"),
                    GpioDirection::Input
                ),
            ]
        );
        assert_eq!(fs.open_handles(), 1);
    }

    #[test]
    fn direction_round_trips() {
        let (fs, mut channel) = channel();
        channel.bind(5, GpioDirection::Input).unwrap();
        assert_eq!(
            fs.contents("/sys/class/gpio/gpio5/direction").as_deref(),
            Some("in")
        );
        assert_eq!(
            fs.contents("/sys/class/gpio/gpio5/direction")
                .unwrap()
                .parse::<GpioDirection>()
                .unwrap(),
            GpioDirection::Input
        );
    }

    #[test]
    fn rebind_closes_and_unexports_before_export() {
        let (fs, mut channel) = channel();
        channel.bind(17, GpioDirection::Input).unwrap();
        fs.clear_ops();

        channel.bind(17, GpioDirection::Output).unwrap();
        assert_eq!(
            fs.ops(),
            vec![
                FsOp::CloseValue(PathBuf::from("/sys/class/gpio/gpio17/value")),
                FsOp::write("/sys/class/gpio/unexport", "17"),
                FsOp::write("/sys/class/gpio/export", "17"),
                FsOp::write("/sys/class/gpio/gpio17/direction", "out"),
                FsOp::OpenValue(
                    PathBuf::from("/sys/class/gpio/gpio17/value"),
                    GpioDirection::Output
                ),
            ]
        );
        assert_eq!(channel.direction(), GpioDirection::Output);
    }

    #[test]
    fn repeated_binds_do_not_leak_handles() {
        let (fs, mut channel) = channel();
        for _ in 0..10 {
            channel.bind(3, GpioDirection::Input).unwrap();
            assert_eq!(fs.open_handles(), 1);
        }
        drop(channel);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn failed_unexport_does_not_stop_rebind() {
        let (fs, mut channel) = channel();
        channel.bind(8, GpioDirection::Input).unwrap();
        fs.fail_on("/sys/class/gpio/unexport");

        channel.bind(8, GpioDirection::Input).unwrap();
        assert!(channel.is_bound());
        assert_eq!(fs.open_handles(), 1);
    }

    #[test]
    fn failed_export_is_tolerated_when_pin_exists() {
        let (fs, mut channel) = channel();
        fs.fail_on("/sys/class/gpio/export");
        channel.bind(9, GpioDirection::Input).unwrap();
        assert!(channel.is_bound());
    }

    #[test]
    fn missing_direction_file_leaves_channel_unbound() {
        let (fs, mut channel) = channel();
        fs.fail_on("/sys/class/gpio/gpio9/direction");
        match channel.bind(9, GpioDirection::Input) {
            Err(BindError::DeviceUnavailable(path, _)) => {
                assert_eq!(path, PathBuf::from("/sys/class/gpio/gpio9/direction"))
            }
            other => panic!("unexpected bind result {:?}", other),
        }
        assert!(!channel.is_bound());
        assert!(channel.value_handle().is_none());
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn missing_value_file_leaves_channel_unbound() {
        let (fs, mut channel) = channel();
        fs.fail_on("/sys/class/gpio/gpio9/value");
        assert!(matches!(
            channel.bind(9, GpioDirection::Input),
            Err(BindError::DeviceUnavailable(..))
        ));
        assert!(!channel.is_bound());
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn set_edge_writes_mode_text() {
        let (fs, mut channel) = channel();
        channel.bind(4, GpioDirection::Input).unwrap();
        channel.set_edge(GpioEdge::Both).unwrap();
        assert_eq!(
            fs.contents("/sys/class/gpio/gpio4/edge").as_deref(),
            Some("both")
        );
        assert_eq!(channel.edge(), Some(GpioEdge::Both));
    }

    #[test]
    fn release_closes_without_unexport() {
        let (fs, mut channel) = channel();
        channel.bind(4, GpioDirection::Input).unwrap();
        fs.clear_ops();

        channel.release();
        assert!(!channel.is_bound());
        assert_eq!(fs.open_handles(), 0);
        assert_eq!(
            fs.ops(),
            vec![FsOp::CloseValue(PathBuf::from("/sys/class/gpio/gpio4/value"))]
        );

        // a later bind has no stale handle to unexport
        channel.bind(4, GpioDirection::Input).unwrap();
        assert!(!fs
            .ops()
            .contains(&FsOp::write("/sys/class/gpio/unexport", "4")));
    }

    #[test]
    fn failed_edge_keeps_previous_mode() {
        let (fs, mut channel) = channel();
        channel.bind(4, GpioDirection::Input).unwrap();
        channel.set_edge(GpioEdge::Rising).unwrap();

        fs.fail_on("/sys/class/gpio/gpio4/edge");
        assert!(matches!(
            channel.set_edge(GpioEdge::Falling),
            Err(EdgeError::Unsupported(..))
        ));
        assert_eq!(channel.edge(), Some(GpioEdge::Rising));
        assert_eq!(
            fs.contents("/sys/class/gpio/gpio4/edge").as_deref(),
            Some("rising")
        );
    }

    #[test]
    fn edge_needs_bound_input() {
        let (_fs, mut channel) = channel();
        assert!(matches!(
            channel.set_edge(GpioEdge::Both),
            Err(EdgeError::NotBound)
        ));

        channel.bind(4, GpioDirection::Output).unwrap();
        assert!(matches!(
            channel.set_edge(GpioEdge::Both),
            Err(EdgeError::NotInput)
        ));
    }

    #[test]
    fn output_writes_level() {
        let (fs, mut channel) = channel();
        channel.bind(22, GpioDirection::Output).unwrap();
        channel.set_value(true).unwrap();
        assert_eq!(fs.level(), GpioValue::High);
        channel.set_low().unwrap();
        assert_eq!(fs.level(), GpioValue::Low);

        assert!(matches!(
            channel.read_value(),
            Err(GpioError::WrongDirection(GpioDirection::Output))
        ));
    }

    #[test]
    fn input_reads_level() {
        let (fs, mut channel) = channel();
        assert!(matches!(channel.read_value(), Err(GpioError::NotBound)));

        channel.bind(22, GpioDirection::Input).unwrap();
        fs.set_level(GpioValue::High);
        assert_eq!(channel.read_value().unwrap(), GpioValue::High);
        fs.set_level(GpioValue::Low);
        assert_eq!(channel.read_value().unwrap(), GpioValue::Low);
    }

    #[test]
    fn timeout_conversion() {
        assert_eq!(poll_timeout(None), PollTimeout::NONE);
        assert_eq!(
            poll_timeout(Some(Duration::from_millis(250))),
            PollTimeout::from(250u16)
        );
        assert_eq!(
            poll_timeout(Some(Duration::from_micros(10))),
            PollTimeout::from(1u8)
        );
        assert_eq!(
            poll_timeout(Some(Duration::from_secs(u64::MAX))),
            PollTimeout::MAX
        );
    }
}
