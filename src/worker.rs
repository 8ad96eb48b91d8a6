//! Worker thread driving a `ButtonController`
//!
//! The loop body is a single `poll_once` call, the edge wait inside it is
//! the only place the thread blocks. There is no way to interrupt a wait in
//! progress; the worker ends when the controller reports it cannot continue.

use std::io;
use std::thread;
use tracing::info;

use super::button::ButtonController;
use super::sysfs::PinFs;

/// Call `poll_once` until it returns `false`, returns the iteration count
pub fn run<F: PinFs>(controller: &mut ButtonController<F>) -> u64 {
    let mut iterations: u64 = 0;
    while controller.poll_once() {
        iterations += 1;
    }
    info!(
        iterations,
        state = ?controller.state(),
        "button worker stopped"
    );
    iterations
}

/// Move `controller` into a named thread running `run`.
///
/// The controller is handed back through the join handle once the loop ends.
pub fn spawn<F>(
    name: &str,
    mut controller: ButtonController<F>,
) -> io::Result<thread::JoinHandle<(ButtonController<F>, u64)>>
where
    F: PinFs + Send + 'static,
    F::Value: Send,
{
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        let iterations = run(&mut controller);
        (controller, iterations)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::ButtonState;
    use crate::config::ButtonConfig;
    use crate::dummy::DummyFs;
    use crate::{GpioValue, Wakeup};
    use std::time::Duration;

    #[test]
    fn worker_counts_until_device_gone() {
        let fs = DummyFs::new();
        let button = ButtonController::new(fs.clone(), &ButtonConfig::new(6))
            .with_settle_delay(Duration::ZERO);
        let status = button.status_handle();

        let worker = spawn("btn-test", button).unwrap();
        fs.script().push_edge(GpioValue::High);
        fs.script().push_edge(GpioValue::Low);
        fs.script().push_wakeup(Wakeup::TimedOut);
        fs.script().push_edge(GpioValue::High);
        fs.script().push_wakeup(Wakeup::Gone);

        let (button, iterations) = worker.join().unwrap();
        assert_eq!(iterations, 4);
        assert_eq!(button.state(), ButtonState::Failed);

        let snapshot = status.snapshot();
        assert_eq!(snapshot.press_count, 3);
        assert_eq!(snapshot.last_read, 1);
        assert!(!snapshot.connected);
    }

    #[test]
    fn failed_controller_stops_at_once() {
        let fs = DummyFs::new();
        fs.fail_on("/sys/class/gpio/gpio6/value");
        let mut button = ButtonController::new(fs.clone(), &ButtonConfig::new(6));
        assert_eq!(run(&mut button), 0);
        assert_eq!(fs.script().waits(), 0);
    }

    #[test]
    fn worker_thread_is_named() {
        let fs = DummyFs::new();
        fs.fail_on("/sys/class/gpio/gpio6/value");
        let button = ButtonController::new(fs, &ButtonConfig::new(6));
        let worker = spawn("BTN_CHILD", button).unwrap();
        assert_eq!(worker.thread().name(), Some("BTN_CHILD"));
        worker.join().unwrap();
    }
}
