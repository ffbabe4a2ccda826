//! Finding the serial device the telemetry collector is attached to.

use std::{fmt::Display, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::{error::Error, serial::SerialLink};

/// Environment variable naming a device to try when no port was asked for explicitly.
pub const PORT_ENV_VAR: &str = "SERIAL_PORT";

/// Lower case fragments of a device description hinting at a microcontroller board.
pub const KNOWN_DESCRIPTIONS: [&str; 4] = ["teensy", "arduino", "cdc acm", "usb"];

/// Lower case device path prefixes used for USB serial adapters.
pub const KNOWN_PATH_PREFIXES: [&str; 3] = ["com", "/dev/ttyacm", "/dev/ttyusb"];

/// A serial device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCandidate {
    /// Likely "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// Human readable description, possibly empty.
    pub description: String,
}

impl PortCandidate {
    /// Create a candidate.
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }

    /// Does this look like a telemetry collector?
    ///
    /// Case insensitive substring match on the description and device path.
    pub fn looks_known(&self) -> bool {
        let description = self.description.to_lowercase();
        let path = self.path.to_lowercase();

        KNOWN_DESCRIPTIONS
            .iter()
            .any(|hint| description.contains(hint))
            || path.contains("usb")
            || KNOWN_PATH_PREFIXES
                .iter()
                .any(|prefix| path.starts_with(prefix))
    }
}

impl Display for PortCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.path, self.description)
    }
}

impl From<serialport::SerialPortInfo> for PortCandidate {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let description = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                match (usb.manufacturer, usb.product) {
                    (Some(manufacturer), Some(product)) => format!("{manufacturer} {product}"),
                    (Some(name), None) | (None, Some(name)) => name,
                    (None, None) => format!("USB device {:04x}:{:04x}", usb.vid, usb.pid),
                }
            }
            serialport::SerialPortType::PciPort => "PCI".into(),
            serialport::SerialPortType::BluetoothPort => "Bluetooth".into(),
            serialport::SerialPortType::Unknown => "n/a".into(),
        };

        Self {
            path: info.port_name,
            description,
        }
    }
}

/// Access to the host's serial devices.
///
/// Ingestion only talks to devices through this, so it can run against
/// [`crate::mock::MockPorts`] as well as real hardware.
pub trait PortBackend: Send + Sync + 'static {
    /// The open device handle.
    type Link: SerialLink;

    /// Check that a device can be opened, then release it right away.
    fn probe(&self, path: &str) -> Result<(), Error>;

    /// List the serial devices present on the host.
    fn available(&self) -> Result<Vec<PortCandidate>, Error>;

    /// Open a device for reading.
    fn open(&self, path: &str, baud: u32) -> Result<Self::Link, Error>;
}

/// The host's real serial devices.
#[derive(Debug, Clone)]
pub struct SystemPorts {
    read_timeout: Duration,
}

impl SystemPorts {
    /// Devices will be opened with the given transport level read timeout.
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for SystemPorts {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl PortBackend for SystemPorts {
    type Link = SerialStream;

    fn probe(&self, path: &str) -> Result<(), Error> {
        let port = serialport::new(path, 9600)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| Error::Open {
                path: path.to_owned(),
                problem: e.to_string(),
            })?;

        drop(port);
        Ok(())
    }

    fn available(&self) -> Result<Vec<PortCandidate>, Error> {
        let ports = tokio_serial::available_ports().map_err(|e| Error::ListPorts(e.to_string()))?;

        Ok(ports.into_iter().map(PortCandidate::from).collect())
    }

    fn open(&self, path: &str, baud: u32) -> Result<Self::Link, Error> {
        tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.read_timeout)
            .open_native_async()
            .map_err(|e| Error::Open {
                path: path.to_owned(),
                problem: format!("{e:#?}"),
            })
    }
}

/// Read the port override from the environment.
/// An empty value counts as unset.
pub fn env_override() -> Option<String> {
    std::env::var(PORT_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Picks the device to read telemetry from.
#[derive(Debug)]
pub struct PortResolver<'a, B> {
    backend: &'a B,
    env_override: Option<String>,
}

impl<'a, B: PortBackend> PortResolver<'a, B> {
    /// A resolver with no environment override.
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            env_override: None,
        }
    }

    /// Set the override tried after the preferred port.
    pub fn with_env_override(mut self, env_override: Option<String>) -> Self {
        self.env_override = env_override;
        self
    }

    fn try_probe(&self, path: &str, origin: &str) -> bool {
        match self.backend.probe(path) {
            Ok(()) => {
                debug!(%path, %origin, "Probe succeeded");
                true
            }
            Err(e) => {
                warn!(%path, %origin, "Probe failed: {e}");
                false
            }
        }
    }

    /// Resolve a device, first success wins:
    ///
    /// 1. `preferred`, if it can be opened.
    /// 2. The environment override, if it can be opened.
    /// 3. The first enumerated device which [looks known](PortCandidate::looks_known).
    /// 4. The first enumerated device.
    ///
    /// No retries are made.
    pub fn resolve(&self, preferred: Option<&str>) -> Result<String, Error> {
        if let Some(preferred) = preferred {
            if self.try_probe(preferred, "preferred") {
                return Ok(preferred.to_owned());
            }
        }

        if let Some(env_port) = self.env_override.as_deref() {
            if self.try_probe(env_port, PORT_ENV_VAR) {
                return Ok(env_port.to_owned());
            }
        }

        let candidates = self.backend.available()?;

        if candidates.is_empty() {
            info!("No serial ports detected on the system");
            return Err(Error::NoPortFound);
        }

        info!(
            "Available serial ports: {}",
            candidates.iter().map(ToString::to_string).join(", ")
        );

        let chosen = candidates
            .iter()
            .find(|candidate| candidate.looks_known())
            .unwrap_or(&candidates[0]);

        Ok(chosen.path.clone())
    }
}
