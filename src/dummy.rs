//! GPIO dummy filesystem
//!
//! The dummy module can be used instead of the sysfs tree to run unit tests
//! or otherwise exercise an application when no embedded device is around.
//!
//! `DummyFs` implements `PinFs`: it remembers every control-file write, keeps
//! the last contents written to each path and counts how many value files are
//! currently open. Paths can be made to fail with `fail_on`.
//!
//! The value files it hands out are `DummyValueFile`s driven by a shared
//! `PinScript`, which queues the wakeups a waiting thread will see and holds
//! the level the file reports.
//!
//! ## Example
//!
//! ```rust
//! use gpio_button::{GpioChannel, GpioDirection, GpioEdge, GpioValue, SysFsPaths};
//! use gpio_button::dummy::DummyFs;
//! use gpio_button::watcher::EdgeWatcher;
//!
//! let fs = DummyFs::new();
//! let mut channel = GpioChannel::new(fs.clone(), SysFsPaths::default());
//! channel.bind(17, GpioDirection::Input).unwrap();
//! channel.set_edge(GpioEdge::Both).unwrap();
//!
//! let mut watcher = EdgeWatcher::new(GpioEdge::Both);
//! let value = channel.value_handle().unwrap();
//! watcher.prime_baseline(value).unwrap();
//!
//! // the next wait wakes on an edge and sees the pin high
//! fs.script().push_edge(GpioValue::High);
//! assert_eq!(watcher.wait_for_edge(value, None).unwrap(), GpioValue::High);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::sysfs::{GpioResult, PinFs};
use super::{GpioDirection, GpioValue, ValueFile, Wakeup};

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A file operation recorded by `DummyFs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOp {
    Write(PathBuf, String),
    OpenValue(PathBuf, GpioDirection),
    CloseValue(PathBuf),
}

impl FsOp {
    pub fn write<P: Into<PathBuf>, S: Into<String>>(path: P, contents: S) -> FsOp {
        FsOp::Write(path.into(), contents.into())
    }
}

#[derive(Debug, Default)]
struct FsState {
    ops: Vec<FsOp>,
    contents: HashMap<PathBuf, String>,
    failing: HashSet<PathBuf>,
    open_handles: usize,
}

/// In-memory stand-in for the sysfs GPIO tree
#[derive(Debug, Clone, Default)]
pub struct DummyFs {
    state: Arc<Mutex<FsState>>,
    script: PinScript,
}

impl DummyFs {
    pub fn new() -> DummyFs {
        DummyFs::default()
    }

    /// Make every later open of `path` fail
    pub fn fail_on<P: Into<PathBuf>>(&self, path: P) {
        lock(&self.state).failing.insert(path.into());
    }

    /// Operations recorded so far, oldest first
    pub fn ops(&self) -> Vec<FsOp> {
        lock(&self.state).ops.clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.state).ops.clear();
    }

    /// Last contents written to `path`
    pub fn contents<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        lock(&self.state).contents.get(path.as_ref()).cloned()
    }

    /// Number of value files handed out and not yet dropped
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    /// The script shared by every value file of this filesystem
    pub fn script(&self) -> &PinScript {
        &self.script
    }

    pub fn level(&self) -> GpioValue {
        self.script.level()
    }

    pub fn set_level(&self, level: GpioValue) {
        self.script.set_level(level)
    }
}

impl PinFs for DummyFs {
    type Value = DummyValueFile;

    fn write_control(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not writable", path.display()),
            ));
        }
        let contents = String::from_utf8_lossy(contents).into_owned();
        state.ops.push(FsOp::Write(path.to_owned(), contents.clone()));
        state.contents.insert(path.to_owned(), contents);
        Ok(())
    }

    fn open_value(&mut self, path: &Path, direction: GpioDirection) -> io::Result<DummyValueFile> {
        let mut state = lock(&self.state);
        if state.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        state.ops.push(FsOp::OpenValue(path.to_owned(), direction));
        state.open_handles += 1;

        Ok(DummyValueFile {
            owner: Some((self.state.clone(), path.to_owned())),
            script: self.script.clone(),
            pos: 0,
        })
    }
}

#[derive(Debug)]
struct PinState {
    level: GpioValue,
    attribute_byte: Option<u8>,
    wakeups: VecDeque<(Wakeup, Option<GpioValue>)>,
    waits: usize,
    reads: usize,
    rewinds: usize,
    writes: usize,
}

impl Default for PinState {
    fn default() -> PinState {
        PinState {
            level: GpioValue::Low,
            attribute_byte: None,
            wakeups: VecDeque::new(),
            waits: 0,
            reads: 0,
            rewinds: 0,
            writes: 0,
        }
    }
}

/// Scripted behaviour of a dummy value file.
///
/// Clones share the same script, so a test can keep one while the file moves
/// into a worker thread.
#[derive(Debug, Clone, Default)]
pub struct PinScript {
    inner: Arc<(Mutex<PinState>, Condvar)>,
}

impl PinScript {
    fn push(&self, wakeup: Wakeup, level: Option<GpioValue>) {
        let (state, cvar) = &*self.inner;
        lock(state).wakeups.push_back((wakeup, level));
        cvar.notify_all();
    }

    /// Queue an edge after which the pin reads `level`
    pub fn push_edge(&self, level: GpioValue) {
        self.push(Wakeup::Edge, Some(level))
    }

    /// Queue a wakeup that leaves the level unchanged
    pub fn push_wakeup(&self, wakeup: Wakeup) {
        self.push(wakeup, None)
    }

    pub fn level(&self) -> GpioValue {
        lock(&self.inner.0).level
    }

    pub fn set_level(&self, level: GpioValue) {
        lock(&self.inner.0).level = level;
    }

    /// Report `byte` instead of the level digit, `None` restores the level
    pub fn set_attribute_byte(&self, byte: Option<u8>) {
        lock(&self.inner.0).attribute_byte = byte;
    }

    /// Number of waits started
    pub fn waits(&self) -> usize {
        lock(&self.inner.0).waits
    }

    pub fn reads(&self) -> usize {
        lock(&self.inner.0).reads
    }

    /// Number of seeks back to offset zero
    pub fn rewinds(&self) -> usize {
        lock(&self.inner.0).rewinds
    }

    pub fn writes(&self) -> usize {
        lock(&self.inner.0).writes
    }

    fn next_wakeup(&self, timeout: Option<Duration>) -> Wakeup {
        let (state, cvar) = &*self.inner;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(state);
        state.waits += 1;

        loop {
            if let Some((wakeup, level)) = state.wakeups.pop_front() {
                if let Some(level) = level {
                    state.level = level;
                }
                return wakeup;
            }

            state = match deadline {
                None => cvar.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wakeup::TimedOut;
                    }
                    cvar.wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Dummy value file.
///
/// Reads behave like the sysfs attribute: `"0\n"` or `"1\n"` from offset
/// zero, nothing once the offset is past the end.
#[derive(Debug)]
pub struct DummyValueFile {
    owner: Option<(Arc<Mutex<FsState>>, PathBuf)>,
    script: PinScript,
    pos: u64,
}

impl DummyValueFile {
    /// A value file not tied to any `DummyFs`
    pub fn detached(level: GpioValue) -> DummyValueFile {
        let script = PinScript::default();
        script.set_level(level);
        DummyValueFile {
            owner: None,
            script,
            pos: 0,
        }
    }

    pub fn script(&self) -> &PinScript {
        &self.script
    }
}

impl Read for DummyValueFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.script.inner.0);
        state.reads += 1;

        let digit = state
            .attribute_byte
            .unwrap_or(u8::from(state.level) + b'0');
        let attr = [digit, b'\n'];
        let start = attr.len().min(self.pos as usize);
        let count = (&attr[start..]).read(buf)?;
        self.pos += count as u64;
        Ok(count)
    }
}

impl Write for DummyValueFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.script.inner.0);
        state.writes += 1;
        if let Some(&first) = buf.first() {
            state.level = GpioValue::from(first == b'1');
        }
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DummyValueFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => 2u64.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;

        if target == 0 {
            lock(&self.script.inner.0).rewinds += 1;
        }
        self.pos = target;
        Ok(target)
    }
}

impl ValueFile for DummyValueFile {
    fn wait_urgent(&mut self, timeout: Option<Duration>) -> GpioResult<Wakeup> {
        Ok(self.script.next_wakeup(timeout))
    }
}

impl Drop for DummyValueFile {
    fn drop(&mut self) {
        if let Some((state, path)) = self.owner.take() {
            let mut state = lock(&state);
            state.open_handles -= 1;
            state.ops.push(FsOp::CloseValue(path));
        }
    }
}
