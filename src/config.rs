use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{error::Error, log_store::DEFAULT_LOG_CAPACITY, transport::TransportKind};

/// Parity checking.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,

    /// Odd parity.
    Odd,

    /// Even parity.
    Even,
}

/// The number of stop bits.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,

    /// Two stop bits.
    Two,
}

/// Flow control.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlowControl {
    /// None.
    #[default]
    None,

    /// XON/XOFF.
    Software,

    /// RTS/CTS.
    Hardware,
}

/// How to open the serial port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerialSettings {
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// Bits per second.
    #[serde(default = "SerialSettings::default_baud")]
    pub baud: u32,

    /// Between 5 and 8.
    #[serde(default = "SerialSettings::default_data_bits")]
    pub data_bits: u8,

    /// See [`Parity`].
    #[serde(default)]
    pub parity: Parity,

    /// See [`StopBits`].
    #[serde(default)]
    pub stop_bits: StopBits,

    /// See [`FlowControl`].
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl SerialSettings {
    fn default_baud() -> u32 {
        115_200
    }

    fn default_data_bits() -> u8 {
        8
    }

    /// Settings for the given port with 115200 8N1, no flow control.
    pub fn new<S: AsRef<str>>(path: S) -> Self {
        Self {
            path: path.as_ref().into(),
            baud: Self::default_baud(),
            data_bits: Self::default_data_bits(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
        }
    }
}

/// The configuration used for running the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Whether rules are evaluated from the start.
    #[serde(default)]
    pub engine_enabled: bool,

    /// How many log entries to keep.
    #[serde(default = "Config::default_log_capacity")]
    pub log_capacity: usize,

    /// Serial reads arriving closer together than this are delivered as one unit.
    #[serde(default = "Config::default_framing_delay_ms")]
    pub framing_delay_ms: u64,

    /// The serial port to open, if any.
    #[serde(default)]
    pub serial: Option<SerialSettings>,

    /// Transports to run in simulated mode.
    #[serde(default)]
    pub simulated: Vec<TransportKind>,

    /// A JSON rules file to import into the library at startup.
    #[serde(default)]
    pub rules: Option<PathBuf>,

    /// Also wire imported rules into the active set.
    #[serde(default)]
    pub activate_imported: bool,

    /// Start out with the factory rules.
    #[serde(default)]
    pub seed_default_rules: bool,

    /// Where to write log files.
    /// No file logging if not set.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_enabled: false,
            log_capacity: Self::default_log_capacity(),
            framing_delay_ms: Self::default_framing_delay_ms(),
            serial: None,
            simulated: vec![],
            rules: None,
            activate_imported: false,
            seed_default_rules: false,
            log_dir: None,
        }
    }
}

impl Config {
    fn default_log_capacity() -> usize {
        DEFAULT_LOG_CAPACITY
    }

    fn default_framing_delay_ms() -> u64 {
        10
    }

    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not valid RON: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            engine_enabled: true,
            serial: Some(SerialSettings::new("/dev/ttyUSB0")),
            simulated: vec![TransportKind::Ble, TransportKind::Http],
            rules: Some("rules.json".into()),
            seed_default_rules: true,
            log_dir: Some("logs".into()),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    fn check_log_capacity(&self) -> Result<(), Error> {
        if self.log_capacity == 0 {
            return Err(Error::BadConfig(
                "The log capacity must be at least one entry".into(),
            ));
        }

        Ok(())
    }

    fn check_serial(&self) -> Result<(), Error> {
        let Some(serial) = &self.serial else {
            return Ok(());
        };

        if serial.path.trim().is_empty() {
            return Err(Error::BadConfig("The serial port path is empty".into()));
        }

        if serial.baud == 0 {
            return Err(Error::BadConfig(format!(
                "The baud rate of `{}` must be non-zero",
                serial.path
            )));
        }

        if !(5..=8).contains(&serial.data_bits) {
            return Err(Error::BadConfig(format!(
                "The serial port `{}` has {} data bits, expected between 5 and 8",
                serial.path, serial.data_bits
            )));
        }

        Ok(())
    }

    fn check_simulated(&self) -> Result<(), Error> {
        let duplicates = self.simulated.iter().duplicates().collect::<Vec<_>>();

        if !duplicates.is_empty() {
            return Err(Error::BadConfig(format!(
                "Simulated transports are listed more than once: {duplicates:?}"
            )));
        }

        if self.serial.is_some() && self.simulated.contains(&TransportKind::Serial) {
            return Err(Error::BadConfig(
                "The serial transport can not be both a real port and simulated".into(),
            ));
        }

        Ok(())
    }

    /// Check the configuration for problems serde can not catch.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_log_capacity()?;
        self.check_serial()?;
        self.check_simulated()?;

        Ok(())
    }
}
