//! Raspberry Pi push button example
//!
//! Counts presses of a button on one GPIO in a worker thread while the main
//! thread prints a JSON status snapshot at a fixed interval.

use anyhow::{bail, Context};
use gpio_button::{worker, ButtonConfig, ButtonController};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
struct Cli {
    /// JSON init file with the pin and sysfs path templates
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// GPIO pin, overrides the init file
    #[structopt(long)]
    pin: Option<u32>,
    /// Seconds between status snapshots
    #[structopt(long, default_value = "1")]
    interval: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::from_args();
    let mut config = match (&args.config, args.pin) {
        (Some(path), _) => ButtonConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(pin)) => ButtonConfig::new(pin),
        (None, None) => bail!("either --config or --pin is required"),
    };
    if let Some(pin) = args.pin {
        config.pin = pin;
        config.validate()?;
    }

    let button = ButtonController::from_config(&config);
    if !button.is_connected() {
        bail!("could not connect to GPIO {}", config.pin);
    }

    let status = button.status_handle();
    let worker = worker::spawn(&config.child_name, button)?;

    while !worker.is_finished() {
        println!("{}", serde_json::to_string(&status.snapshot())?);
        thread::sleep(Duration::from_secs(args.interval));
    }

    match worker.join() {
        Ok((_, iterations)) => bail!("button worker stopped after {} iterations", iterations),
        Err(_) => bail!("button worker panicked"),
    }
}
