use crate::instrument_link::{InstrumentLink, LinkError};
use crate::oscilloscope::{Oscilloscope, ScopeProfile};
use crate::scpi_terminal::ScpiTerminal;
use serialport::{SerialPortInfo, SerialPortType};
use std::net::TcpStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDevice {
    pub name: String,
    pub port: String,
}

impl ScopeDevice {
    pub fn new(name: String, port: String) -> Self {
        Self { name, port }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Instrument link error: {0}")]
    Link(#[from] LinkError),

    #[error("Serial port enumeration failed: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("No USB instrument {name} found. Please connect the oscilloscope or specify the port manually")]
    DeviceNotFound { name: String },

    #[error("Expected exactly one USB instrument, found {found:?}")]
    AmbiguousDevice { found: Vec<String> },

    #[error("Instrument on {port} did not identify itself: {source}")]
    Identification {
        port: String,
        #[source]
        source: LinkError,
    },
}

pub struct ScopeConnector;

impl ScopeConnector {
    /// Connect to an oscilloscope on a serial/USB port.
    ///
    /// Without `port`, the single USB instrument matching `name` (any USB
    /// instrument when `name` is `None`) is used.
    pub fn connect(
        name: Option<&str>,
        port: Option<&str>,
        profile: ScopeProfile,
    ) -> Result<Oscilloscope<ScpiTerminal>, ConnectorError> {
        let port = match port {
            Some(port) => port.to_string(),
            None => Self::get_device_port(name)?,
        };
        log::debug!("Connecting to oscilloscope on port {}", port);

        let terminal = ScpiTerminal::open(&port, profile.baud_rate, profile.read_timeout)?
            .with_max_block_len(profile.max_block_len);
        Self::identify(Oscilloscope::new(terminal, profile), &port)
    }

    /// Connect to an oscilloscope over raw SCPI on TCP, e.g. `192.168.1.50:5555`.
    pub fn connect_tcp(
        addr: &str,
        profile: ScopeProfile,
    ) -> Result<Oscilloscope<ScpiTerminal<TcpStream>>, ConnectorError> {
        log::debug!("Connecting to oscilloscope at {}", addr);
        let terminal = ScpiTerminal::connect_tcp(addr, profile.read_timeout)?
            .with_max_block_len(profile.max_block_len);
        Self::identify(Oscilloscope::new(terminal, profile), addr)
    }

    fn identify<L: InstrumentLink>(
        mut scope: Oscilloscope<L>,
        port: &str,
    ) -> Result<Oscilloscope<L>, ConnectorError> {
        scope
            .identify()
            .map_err(|source| ConnectorError::Identification {
                port: port.to_string(),
                source,
            })?;
        Ok(scope)
    }

    /// USB serial instrument description, if `info` is one matching `name`.
    fn usb_device(name: Option<&str>, info: &SerialPortInfo) -> Option<ScopeDevice> {
        let SerialPortType::UsbPort(usb) = &info.port_type else {
            return None;
        };
        let product = usb
            .product
            .clone()
            .unwrap_or_else(|| format!("{:04x}:{:04x}", usb.vid, usb.pid));

        if let Some(expected_name) = name {
            if !product.contains(expected_name) {
                return None;
            }
        }
        Some(ScopeDevice::new(product, info.port_name.clone()))
    }

    /// Get all USB instruments, optionally filtered by product name
    pub fn get_available_devices(name: Option<&str>) -> Result<Vec<ScopeDevice>, ConnectorError> {
        Ok(serialport::available_ports()?
            .iter()
            .filter_map(|info| Self::usb_device(name, info))
            .collect())
    }

    fn get_device_port(name: Option<&str>) -> Result<String, ConnectorError> {
        log::debug!("Searching for USB instrument {:?}", name);
        let devices = Self::get_available_devices(name)?;
        Self::select_single(devices, name).map(|device| device.port)
    }

    /// Exactly one candidate is required; anything else is reported.
    fn select_single(
        mut devices: Vec<ScopeDevice>,
        name: Option<&str>,
    ) -> Result<ScopeDevice, ConnectorError> {
        match devices.len() {
            0 => Err(ConnectorError::DeviceNotFound {
                name: name.unwrap_or("(any)").to_string(),
            }),
            1 => Ok(devices.remove(0)),
            _ => Err(ConnectorError::AmbiguousDevice {
                found: devices
                    .into_iter()
                    .map(|d| format!("{} at {}", d.name, d.port))
                    .collect(),
            }),
        }
    }
}
