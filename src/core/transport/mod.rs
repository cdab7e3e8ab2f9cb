//! Transport layer for the serial device link
//!
//! Defines the device handle, the open-port abstraction and the discovery
//! capability the connection manager drives. The native implementation on
//! top of the `serialport` crate lives in [`serial`].

mod serial;

pub use serial::{list_ports, HotplugMonitor, SerialportLink, SerialportProvider};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// USB vendor/product identifier pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl UsbId {
    /// Create a new identifier
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Common USB-serial bridge chips
pub const KNOWN_BRIDGES: &[UsbId] = &[
    // WCH CH340 / CH341
    UsbId::new(0x1A86, 0x7523),
    UsbId::new(0x1A86, 0x5523),
    // FTDI FT232R / FT231X
    UsbId::new(0x0403, 0x6001),
    UsbId::new(0x0403, 0x6015),
    // Silicon Labs CP210x
    UsbId::new(0x10C4, 0xEA60),
    // Prolific PL2303
    UsbId::new(0x067B, 0x2303),
];

/// Stable identity of a physical device
///
/// Detach events are matched against held devices by this key only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Identity key (OS port path)
    pub id: DeviceId,
    /// Human readable name
    pub name: String,
    /// USB vendor/product
    pub usb: UsbId,
    /// Serial number, if reported
    pub serial_number: Option<String>,
}

impl DeviceHandle {
    /// Create a handle
    pub fn new(path: &str, name: &str, usb: UsbId) -> Self {
        Self {
            id: DeviceId(path.to_string()),
            name: name.to_string(),
            usb,
            serial_number: None,
        }
    }

    /// True if the device's chip is in `allowed`
    pub fn matches(&self, allowed: &[UsbId]) -> bool {
        allowed.contains(&self.usb)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id, self.usb)
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(LinkError::Config(format!("unknown parity '{other}'"))),
        }
    }
}

/// Port parameters applied once at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
}

impl LinkParams {
    /// Create parameters with 8N1 framing
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }
}

impl Default for LinkParams {
    fn default() -> Self {
        Self::new(9600)
    }
}

impl fmt::Display for LinkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud ({}{}{})",
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits
        )
    }
}

/// Link error types
#[derive(Error, Debug)]
pub enum LinkError {
    /// Open failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation did not finish in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Device vanished
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port rejected the parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No port open
    #[error("Not connected")]
    NotConnected,
}

impl LinkError {
    /// True if the port can no longer be used after this error
    pub fn is_fatal(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            LinkError::DeviceNotFound(_) => true,
            LinkError::Io(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionReset
                    | ErrorKind::PermissionDenied
                    | ErrorKind::NotFound
            ),
            LinkError::ConnectionFailed(_)
            | LinkError::Timeout(_)
            | LinkError::PermissionDenied(_)
            | LinkError::Config(_)
            | LinkError::NotConnected => false,
        }
    }
}

/// Notifications from the device platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Access to the device was granted
    PermissionGranted(DeviceId),
    /// Access to the device was refused
    PermissionDenied(DeviceId),
    /// Device was unplugged
    Detached(DeviceId),
}

/// An open, bidirectional byte channel to a device
///
/// All calls block for at most the given timeout.
pub trait SerialLink: Send {
    /// Apply port parameters
    fn configure(&mut self, params: &LinkParams) -> Result<(), LinkError>;

    /// Write every byte of `data`
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<(), LinkError>;

    /// Read up to `buf.len()` bytes, returning the count
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Close the port
    fn close(&mut self) -> Result<(), LinkError>;
}

/// Device discovery, permission and open capability
///
/// Methods may block; the connection manager calls them off the async
/// executor.
pub trait DeviceProvider: Send + Sync {
    /// List candidate devices in discovery order
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, LinkError>;

    /// True if the process may already open `device`
    fn has_permission(&self, device: &DeviceHandle) -> bool;

    /// Ask for access; the answer arrives as a [`DeviceEvent`]
    fn request_permission(&self, device: &DeviceHandle) -> Result<(), LinkError>;

    /// Open the first port of `device`
    fn open(&self, device: &DeviceHandle) -> Result<Box<dyn SerialLink>, LinkError>;

    /// Subscribe to permission and detach notifications
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_link_params_default() {
        let params = LinkParams::default();
        assert_eq!(params.baud_rate, 9600);
        assert_eq!(params.data_bits, 8);
        assert_eq!(params.stop_bits, 1);
        assert_eq!(params.parity, SerialParity::None);
        assert_eq!(params.to_string(), "9600 baud (8N1)");
    }

    #[test]
    fn test_parity_parse() {
        assert_eq!("E".parse::<SerialParity>().unwrap(), SerialParity::Even);
        assert_eq!("none".parse::<SerialParity>().unwrap(), SerialParity::None);
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_device_matching() {
        let device = DeviceHandle::new("/dev/ttyUSB0", "CH340", UsbId::new(0x1A86, 0x7523));
        assert!(device.matches(KNOWN_BRIDGES));
        assert!(!device.matches(&[UsbId::new(0x0403, 0x6001)]));
        assert_eq!(device.usb.to_string(), "1a86:7523");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!LinkError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!LinkError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_fatal());
        assert!(LinkError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(LinkError::DeviceNotFound("/dev/ttyUSB0".into()).is_fatal());
    }
}
