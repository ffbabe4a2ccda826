use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error, parser::HEADER_MARKER, serial::codecs::lines::DEFAULT_MAX_LINE_LENGTH,
    server::DEFAULT_PORT,
};

/// Where the live telemetry websocket is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

/// The configuration used for running ingestion and the server.
///
/// Every field may be omitted from a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The device to try first.
    /// Likely "/dev/ttyACMx" or "COMx".
    /// If not set, the `SERIAL_PORT` environment variable and then
    /// the host's device list are consulted.
    pub port: Option<String>,

    /// Serial baud rate.
    pub baud: u32,

    /// Directory where session files are written.
    pub sessions_dir: PathBuf,

    /// Lines containing this are headers.
    pub header_marker: String,

    /// How long to wait before reading again when the device had nothing to say.
    pub poll_interval_ms: u64,

    /// How long to wait after a failed read.
    pub read_backoff_ms: u64,

    /// Transport level read timeout.
    pub read_timeout_ms: u64,

    /// How many of the first data lines are logged as samples.
    pub sample_lines: usize,

    /// Longer lines from the device are skipped.
    pub max_line_length: usize,

    /// How many records each live subscriber may lag behind.
    pub broadcast_capacity: usize,

    /// See [`ServerConfig`].
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            sessions_dir: PathBuf::from("sessions"),
            header_marker: HEADER_MARKER.into(),
            poll_interval_ms: 10,
            read_backoff_ms: 100,
            read_timeout_ms: 1000,
            sample_lines: 5,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            broadcast_capacity: 1024,
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        let config = Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            port: Some("/dev/ttyACM0".into()),
            sessions_dir: PathBuf::from("/var/lib/esc-telemetry/sessions"),
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: DEFAULT_PORT,
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("// Could not serialize config: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// See [`Config::poll_interval_ms`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// See [`Config::read_backoff_ms`].
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    /// See [`Config::read_timeout_ms`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.baud == 0 {
            return Err(Error::BadConfig("The baud rate must be non-zero".into()));
        }

        if self.header_marker.trim().is_empty() {
            return Err(Error::BadConfig("The header marker must not be empty".into()));
        }

        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("read_backoff_ms", self.read_backoff_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("max_line_length", self.max_line_length as u64),
        ] {
            if value == 0 {
                return Err(Error::BadConfig(format!("`{name}` must be non-zero")));
            }
        }

        if self.broadcast_capacity == 0 {
            return Err(Error::BadConfig(
                "`broadcast_capacity` must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
