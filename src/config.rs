//! Button configuration
//!
//! Read once at start-up from the JSON init file shared with the rest of the
//! host application. Only the keys below are used, everything else in the
//! file is ignored:
//!
//! ```json
//! {
//!     "BTN_GPIO_PIN": 17,
//!     "BTN_DEV_STR_EXPORT": "/sys/class/gpio/export",
//!     "BTN_DEV_STR_UNEXPORT": "/sys/class/gpio/unexport",
//!     "BTN_DEV_STR_DIRECTION": "/sys/class/gpio/gpio%d/direction",
//!     "BTN_DEV_STR_EDGE": "/sys/class/gpio/gpio%d/edge",
//!     "BTN_DEV_STR_VALUE": "/sys/class/gpio/gpio%d/value",
//!     "CHILD_NAME": "BTN_CHILD"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::sysfs::{SysFsPaths, MAX_PIN};

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Io(err: io::Error) {
            from()
            description("io error")
            display("I/O error: {}", err)
            cause(err)
        }
        Json(err: serde_json::Error) {
            from()
            description("malformed configuration")
            display("Malformed configuration: {}", err)
            cause(err)
        }
        InvalidPin(pin: u32) {
            description("GPIO pin out of range")
            display("Invalid GPIO pin {}, value must be in range [0..{}]", pin, MAX_PIN)
        }
    }
}

fn default_child_name() -> String {
    "BTN_CHILD".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    #[serde(rename = "BTN_GPIO_PIN")]
    pub pin: u32,
    #[serde(flatten)]
    pub paths: SysFsPaths,
    /// Name of the worker thread
    #[serde(rename = "CHILD_NAME", default = "default_child_name")]
    pub child_name: String,
}

impl ButtonConfig {
    /// Configuration for `pin` with the standard `/sys/class/gpio` paths
    pub fn new(pin: u32) -> ButtonConfig {
        ButtonConfig {
            pin,
            paths: SysFsPaths::default(),
            child_name: default_child_name(),
        }
    }

    pub fn from_json(json: &str) -> Result<ButtonConfig, ConfigError> {
        let config: ButtonConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ButtonConfig, ConfigError> {
        ButtonConfig::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pin > MAX_PIN {
            return Err(ConfigError::InvalidPin(self.pin));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_host_init_file() {
        let config = ButtonConfig::from_json(
            r#"{
                "APP_CFE_NAME": "RPI_BTN",
                "APP_CMD_PIPE_DEPTH": 5,
                "BTN_GPIO_PIN": 23,
                "BTN_DEV_STR_EXPORT": "/tmp/gpio/export",
                "BTN_DEV_STR_UNEXPORT": "/tmp/gpio/unexport",
                "BTN_DEV_STR_DIRECTION": "/tmp/gpio/gpio%d/direction",
                "BTN_DEV_STR_EDGE": "/tmp/gpio/gpio%d/edge",
                "BTN_DEV_STR_VALUE": "/tmp/gpio/gpio%d/value",
                "CHILD_NAME": "RPI_BTN_CHILD"
            }"#,
        )
        .unwrap();

        assert_eq!(config.pin, 23);
        assert_eq!(config.child_name, "RPI_BTN_CHILD");
        assert_eq!(config.paths, SysFsPaths::under("/tmp/gpio"));
        assert_eq!(
            config.paths.value(23),
            PathBuf::from("/tmp/gpio/gpio23/value")
        );
    }

    #[test]
    fn missing_paths_use_defaults() {
        let config = ButtonConfig::from_json(r#"{ "BTN_GPIO_PIN": 4 }"#).unwrap();
        assert_eq!(config, ButtonConfig::new(4));
    }

    #[test]
    fn pin_is_required() {
        assert!(matches!(
            ButtonConfig::from_json("{}"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn out_of_range_pin_is_rejected() {
        assert!(matches!(
            ButtonConfig::from_json(r#"{ "BTN_GPIO_PIN": 32 }"#),
            Err(ConfigError::InvalidPin(32))
        ));
    }
}
