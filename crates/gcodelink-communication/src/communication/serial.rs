//! Serial port transport
//!
//! Opens a controller's USB/RS-232 port with the `serialport` crate and splits
//! it into a reader half (blocking reads moved onto tokio's blocking pool) and
//! a writer half (direct blocking writes).

use super::transport::{Connector, TransportReader, TransportWriter};
use super::{ConnectionParams, SerialParity};
use async_trait::async_trait;
use gcodelink_core::{ConnectionError, Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Size of a single read from the port
const READ_CHUNK_SIZE: usize = 256;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB Serial Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// USB vendor/product IDs if applicable
    pub usb_ids: Option<(u16, u16)>,
}

/// List serial ports that look like CNC controllers
///
/// Keeps Windows `COM*`, Linux `/dev/ttyUSB*` and `/dev/ttyACM*`, and macOS
/// `/dev/cu.usbserial-*` and `/dev/cu.usbmodem*` ports.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::from(ConnectionError::SerialError {
            reason: format!("Failed to enumerate ports: {}", e),
        })
    })?;

    Ok(ports
        .into_iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
                description: format!(
                    "USB {} {}",
                    usb.manufacturer.as_deref().unwrap_or("Device"),
                    usb.product.as_deref().unwrap_or("Serial Port")
                ),
                manufacturer: usb.manufacturer,
                usb_ids: Some((usb.vid, usb.pid)),
                port_name: port.port_name,
            },
            serialport::SerialPortType::BluetoothPort => SerialPortInfo {
                port_name: port.port_name,
                description: "Bluetooth Serial".to_string(),
                manufacturer: None,
                usb_ids: None,
            },
            _ => SerialPortInfo {
                port_name: port.port_name,
                description: "Serial Port".to_string(),
                manufacturer: None,
                usb_ids: None,
            },
        })
        .collect())
}

/// Check if a port name matches CNC controller patterns
pub fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn to_data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("Invalid data bits: {}", bits),
        }
        .into()),
    }
}

fn to_stop_bits(bits: u8) -> Result<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("Invalid stop bits: {}", bits),
        }
        .into()),
    }
}

/// Opens serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl SerialConnector {
    /// Create a serial connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SerialConnector {
    fn open(
        &self,
        params: &ConnectionParams,
    ) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        if params.port.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "No port given".to_string(),
            }
            .into());
        }

        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.read_timeout_ms.max(1)))
            .data_bits(to_data_bits(params.data_bits)?)
            .stop_bits(to_stop_bits(params.stop_bits)?)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            });

        let failed = |e: serialport::Error| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            Error::from(ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: e.to_string(),
            })
        };

        let writer = builder.open().map_err(failed)?;
        let reader = writer.try_clone().map_err(failed)?;
        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);

        let reader: Box<dyn TransportReader> = Box::new(SerialReader {
            port: Some(reader),
            name: params.port.clone(),
        });
        let writer: Box<dyn TransportWriter> = Box::new(SerialWriter {
            port: Some(writer),
            name: params.port.clone(),
        });
        Ok((reader, writer))
    }
}

struct SerialReader {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

#[async_trait]
impl TransportReader for SerialReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(mut port) = self.port.take() else {
                return Ok(None);
            };

            let (port, result) = tokio::task::spawn_blocking(move || {
                let mut buf = [0u8; READ_CHUNK_SIZE];
                let result = port.read(&mut buf).map(|n| buf[..n].to_vec());
                (port, result)
            })
            .await
            .map_err(|e| Error::other(format!("Serial read task failed: {}", e)))?;
            self.port = Some(port);

            match result {
                Ok(data) if !data.is_empty() => return Ok(Some(data)),
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    continue
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!("Read from {} failed: {}", self.name, e);
                    return Err(ConnectionError::ConnectionLost {
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            tracing::debug!("Closed reader for {}", self.name);
        }
        Ok(())
    }
}

struct SerialWriter {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl TransportWriter for SerialWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotConnected)?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| {
                Error::from(ConnectionError::WriteFailed {
                    reason: e.to_string(),
                })
            })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            // A broken pipe here only means the device is already gone.
            if let Err(e) = port.flush() {
                tracing::debug!("Flush on close of {} failed: {}", self.name, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cnc_port_names() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(is_valid_cnc_port("COM12"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbserial-1420"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14101"));
    }

    #[test]
    fn test_invalid_cnc_port_names() {
        assert!(!is_valid_cnc_port("COM"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
        assert!(!is_valid_cnc_port("/dev/cu.Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_serial_param_conversion() {
        assert!(to_data_bits(8).is_ok());
        assert!(to_data_bits(9).is_err());
        assert!(to_stop_bits(2).is_ok());
        assert!(to_stop_bits(3).is_err());
    }

    #[test]
    fn test_open_without_port_is_rejected() {
        let result = SerialConnector::new().open(&ConnectionParams::default());
        assert!(matches!(
            result,
            Err(Error::Connection(ConnectionError::InvalidParameters { .. }))
        ));
    }
}
