//! Serial port implementation on top of the `serialport` crate

use super::{
    DeviceEvent, DeviceHandle, DeviceId, DeviceProvider, LinkError, LinkParams, SerialLink,
    SerialParity, UsbId,
};
use serialport::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits,
};
use std::collections::HashSet;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Timeout used while opening a port, before parameters are applied
const OPEN_TIMEOUT: Duration = Duration::from_millis(1000);

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => LinkError::DeviceNotFound(e.description),
            serialport::ErrorKind::InvalidInput => LinkError::Config(e.description),
            serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                LinkError::PermissionDenied(e.description)
            }
            serialport::ErrorKind::Io(kind) => {
                LinkError::Io(std::io::Error::new(kind, e.description))
            }
            serialport::ErrorKind::Unknown => LinkError::ConnectionFailed(e.description),
        }
    }
}

fn map_io(e: std::io::Error, timeout: Duration) -> LinkError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => LinkError::Timeout(timeout),
        _ => LinkError::Io(e),
    }
}

/// Convert port enumeration info into a device handle
///
/// Only USB ports carry vendor/product IDs; others are skipped.
fn to_handle(info: SerialPortInfo) -> Option<DeviceHandle> {
    match info.port_type {
        SerialPortType::UsbPort(usb) => {
            let name = usb
                .product
                .clone()
                .unwrap_or_else(|| info.port_name.clone());
            Some(DeviceHandle {
                id: DeviceId(info.port_name),
                name,
                usb: UsbId::new(usb.vid, usb.pid),
                serial_number: usb.serial_number,
            })
        }
        _ => None,
    }
}

/// List available USB serial devices
pub fn list_ports() -> Result<Vec<DeviceHandle>, LinkError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().filter_map(to_handle).collect())
}

/// Open serial port
pub struct SerialportLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialportLink {
    /// Open `path` with default 9600 8N1 settings
    pub fn open(path: &str) -> Result<Self, LinkError> {
        let port = serialport::new(path, LinkParams::default().baud_rate)
            .timeout(OPEN_TIMEOUT)
            .open()?;

        Ok(Self {
            name: path.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::NotConnected)
    }
}

impl SerialLink for SerialportLink {
    fn configure(&mut self, params: &LinkParams) -> Result<(), LinkError> {
        let data_bits = match params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => return Err(LinkError::Config(format!("unsupported data bits: {other}"))),
        };

        let stop_bits = match params.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => return Err(LinkError::Config(format!("unsupported stop bits: {other}"))),
        };

        let parity = match params.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let port = self.port()?;
        port.set_baud_rate(params.baud_rate)?;
        port.set_data_bits(data_bits)?;
        port.set_stop_bits(stop_bits)?;
        port.set_parity(parity)?;
        port.set_flow_control(FlowControl::None)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<(), LinkError> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        port.write_all(data).map_err(|e| map_io(e, timeout))?;
        port.flush().map_err(|e| map_io(e, timeout))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        port.read(buf).map_err(|e| map_io(e, timeout))
    }

    fn close(&mut self) -> Result<(), LinkError> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.name);
        }
        Ok(())
    }
}

/// Device provider for locally attached USB serial adapters
///
/// Desktop platforms have no runtime permission grant: access is decided
/// when the port is opened, so every device reports as permitted.
pub struct SerialportProvider {
    events: broadcast::Sender<DeviceEvent>,
}

impl SerialportProvider {
    /// Create a new provider
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { events }
    }

    /// Start polling for unplugged devices
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_hotplug(&self, interval: Duration) -> HotplugMonitor {
        let mut monitor = HotplugMonitor::new(self.events.clone());
        monitor.start(interval);
        monitor
    }
}

impl Default for SerialportProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SerialportProvider {
    fn list_devices(&self) -> Result<Vec<DeviceHandle>, LinkError> {
        list_ports()
    }

    fn has_permission(&self, _device: &DeviceHandle) -> bool {
        true
    }

    fn request_permission(&self, device: &DeviceHandle) -> Result<(), LinkError> {
        let _ = self
            .events
            .send(DeviceEvent::PermissionGranted(device.id.clone()));
        Ok(())
    }

    fn open(&self, device: &DeviceHandle) -> Result<Box<dyn SerialLink>, LinkError> {
        let link = SerialportLink::open(&device.id.0)?;
        info!("Opened {}", device);
        Ok(Box::new(link))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

/// Polls the port list and reports unplugged devices
pub struct HotplugMonitor {
    events: broadcast::Sender<DeviceEvent>,
    cancel_tx: Option<mpsc::Sender<()>>,
}

impl HotplugMonitor {
    /// Create a new monitor publishing to `events`
    pub fn new(events: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            events,
            cancel_tx: None,
        }
    }

    /// Start polling every `interval`
    pub fn start(&mut self, interval: Duration) {
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        self.cancel_tx = Some(cancel_tx);

        let events = self.events.clone();

        tokio::spawn(async move {
            let mut known = snapshot().await;

            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let current = snapshot().await;

                        for port in known.difference(&current) {
                            info!("USB device removed: {}", port);
                            let _ = events.send(DeviceEvent::Detached(DeviceId(port.clone())));
                        }

                        for port in current.difference(&known) {
                            debug!("USB device detected: {}", port);
                        }

                        known = current;
                    }
                }
            }
        });
    }

    /// Stop polling
    pub fn stop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn snapshot() -> HashSet<String> {
    match tokio::task::spawn_blocking(serialport::available_ports).await {
        Ok(Ok(ports)) => ports.into_iter().map(|p| p.port_name).collect(),
        Ok(Err(e)) => {
            warn!("Port enumeration failed: {}", e);
            HashSet::new()
        }
        Err(e) => {
            warn!("Port enumeration task failed: {}", e);
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb_info(path: &str, product: Option<&str>) -> SerialPortInfo {
        SerialPortInfo {
            port_name: path.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x1A86,
                pid: 0x7523,
                serial_number: Some("A1".to_string()),
                manufacturer: None,
                product: product.map(String::from),
            }),
        }
    }

    #[test]
    fn test_usb_port_to_handle() {
        let handle = to_handle(usb_info("/dev/ttyUSB0", Some("USB Serial"))).unwrap();
        assert_eq!(handle.id, DeviceId("/dev/ttyUSB0".into()));
        assert_eq!(handle.name, "USB Serial");
        assert_eq!(handle.usb, UsbId::new(0x1A86, 0x7523));
        assert_eq!(handle.serial_number.as_deref(), Some("A1"));
    }

    #[test]
    fn test_name_falls_back_to_path() {
        let handle = to_handle(usb_info("COM4", None)).unwrap();
        assert_eq!(handle.name, "COM4");
    }

    #[test]
    fn test_non_usb_ports_skipped() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        };
        assert!(to_handle(info).is_none());
    }

    #[test]
    fn test_error_mapping() {
        let err: LinkError = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone").into();
        assert!(matches!(err, LinkError::DeviceNotFound(ref d) if d == "gone"));
        assert!(err.is_fatal());

        let err: LinkError = serialport::Error::new(
            serialport::ErrorKind::Io(ErrorKind::PermissionDenied),
            "denied",
        )
        .into();
        assert!(matches!(err, LinkError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_request_permission_grants() {
        let provider = SerialportProvider::new();
        let mut rx = provider.subscribe();
        let device = DeviceHandle::new("/dev/ttyUSB0", "CH340", UsbId::new(0x1A86, 0x7523));

        assert!(provider.has_permission(&device));
        provider.request_permission(&device).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::PermissionGranted(device.id.clone())
        );
    }
}
