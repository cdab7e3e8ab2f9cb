//! Serial connection management
//!
//! The [`ConnectionManager`] discovers an allowed device, negotiates access,
//! opens and configures its port, and exchanges checksum-framed event codes.
//! Lifecycle operations run as background tasks; callers follow their outcome
//! through [`ConnectionManager::subscribe`].

use super::frame;
use super::state::ConnectionState;
use super::transport::{
    DeviceEvent, DeviceHandle, DeviceId, DeviceProvider, LinkError, LinkParams, SerialLink, UsbId,
    KNOWN_BRIDGES,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Port parameters applied at open
    pub params: LinkParams,
    /// Bound for a single read or write
    pub io_timeout: Duration,
    /// Bound for listing and opening devices
    pub open_timeout: Duration,
    /// Largest frame accepted by `read_event_code`
    pub max_frame_len: usize,
    /// Chips eligible for selection
    pub allowed_devices: Vec<UsbId>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            params: LinkParams::default(),
            io_timeout: Duration::from_millis(1000),
            open_timeout: Duration::from_secs(5),
            max_frame_len: 64,
            allowed_devices: KNOWN_BRIDGES.to_vec(),
        }
    }
}

/// Serial connection manager
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn DeviceProvider>,
    config: ConnectionConfig,
    /// Current state, replayed to late subscribers
    state_tx: watch::Sender<ConnectionState>,
    /// Device selected by the current cycle
    device: Mutex<Option<DeviceHandle>>,
    /// Open port
    link: Mutex<Option<Box<dyn SerialLink>>>,
    /// Cleared by `cleanup`
    live: AtomicBool,
    /// Device event listener
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager and subscribe to the provider's device events
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(provider: Arc<dyn DeviceProvider>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let events = provider.subscribe();

        let inner = Arc::new(Inner {
            provider,
            config,
            state_tx,
            device: Mutex::new(None),
            link: Mutex::new(None),
            live: AtomicBool::new(true),
            listener: Mutex::new(None),
        });

        let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));
        *inner.listener.lock() = Some(listener);

        Self { inner }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Subscribe to state changes
    ///
    /// The receiver sees the current state immediately.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Device held by the current cycle
    pub fn current_device(&self) -> Option<DeviceHandle> {
        self.inner.device.lock().clone()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.inner.state_tx.borrow().is_connected()
    }

    /// Configuration in use
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Start a discovery cycle in the background
    ///
    /// Ends in `NoDevicesFound`, `RequestingPermission`, `Connected` or
    /// `Error`. Ignored while a cycle is running or a port is open.
    pub fn discover_devices(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.discover().await })
    }

    /// Connect to `device` in the background
    ///
    /// Discovery and permission grants call this internally. Only takes effect
    /// while a cycle is `Discovering` or `RequestingPermission`.
    pub fn connect_to_device(&self, device: DeviceHandle) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.connect(device).await })
    }

    /// Close the port and release the device in the background
    ///
    /// Always ends in `Disconnected`; close errors are logged only.
    pub fn close_connection(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.close())
    }

    /// Write raw bytes to the open port
    ///
    /// Returns `false` if not connected or the write fails or times out.
    pub fn send_data(&self, data: &[u8]) -> bool {
        let mut slot = self.inner.link.lock();
        let Some(link) = slot.as_mut() else {
            debug!("Send skipped: not connected");
            return false;
        };

        match link.write_all(data, self.inner.config.io_timeout) {
            Ok(()) => {
                trace!("TX {}", hex::encode(data));
                true
            }
            Err(e) => {
                warn!("Write of {} bytes failed: {}", data.len(), e);
                if e.is_fatal() {
                    let link = slot.take();
                    drop(slot);
                    self.inner.fail(link, e.to_string());
                }
                false
            }
        }
    }

    /// Read up to `max_len` bytes from the open port
    ///
    /// Returns `None` if not connected, nothing arrived in time, or the read
    /// fails.
    pub fn read_data(&self, max_len: usize) -> Option<Bytes> {
        if max_len == 0 {
            return None;
        }

        let mut slot = self.inner.link.lock();
        let link = slot.as_mut()?;

        let mut buffer = vec![0u8; max_len];
        match link.read(&mut buffer, self.inner.config.io_timeout) {
            Ok(0) => None,
            Ok(n) => {
                buffer.truncate(n);
                trace!("RX {}", hex::encode(&buffer));
                Some(Bytes::from(buffer))
            }
            Err(LinkError::Timeout(_)) => None,
            Err(e) => {
                warn!("Read failed: {}", e);
                if e.is_fatal() {
                    let link = slot.take();
                    drop(slot);
                    self.inner.fail(link, e.to_string());
                }
                None
            }
        }
    }

    /// Send `code` followed by its CRC-8 byte
    pub fn send_event_code(&self, code: &str) -> bool {
        let frame = frame::encode_event_frame(code);
        self.send_data(&frame)
    }

    /// Read one frame and return its event code
    ///
    /// Corrupted frames are dropped and reported as `None`, the same as when
    /// no data arrived.
    pub fn read_event_code(&self) -> Option<String> {
        let data = self.read_data(self.inner.config.max_frame_len)?;
        match frame::decode_event_frame(&data) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!("Rejected frame {}: {}", hex::encode(&data), e);
                None
            }
        }
    }

    /// Close any connection and drop the device event subscription
    ///
    /// Background work still in flight afterwards leaves the state alone.
    pub fn cleanup(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.live.store(false, Ordering::SeqCst);
        self.inner.close();
        info!("Connection manager cleaned up");
    }
}

impl Inner {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Apply a transition if the table allows it
    fn transition(&self, next: ConnectionState) -> bool {
        if !self.is_live() && next != ConnectionState::Disconnected {
            debug!("Ignoring transition to {} after cleanup", next);
            return false;
        }

        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(&next) {
                warn!("Invalid transition from {} to {}", state, next);
                return false;
            }
            info!("Connection state: {} -> {}", state, next);
            *state = next;
            true
        })
    }

    /// Transition and set the held device as one step
    ///
    /// The device slot stays locked across the transition, so a concurrent
    /// `close` or `fail` cannot interleave between the two.
    fn enter(&self, next: ConnectionState, device: Option<DeviceHandle>) -> bool {
        let mut slot = self.device.lock();
        if !self.transition(next) {
            return false;
        }
        *slot = device;
        true
    }

    async fn discover(self: &Arc<Self>) {
        if !self.transition(ConnectionState::Discovering) {
            debug!("Discovery skipped in state {}", self.state());
            return;
        }

        let provider = self.provider.clone();
        let allowed = self.config.allowed_devices.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            let devices = provider.list_devices()?;
            debug!("Discovered {} candidate devices", devices.len());
            Ok::<_, LinkError>(
                devices
                    .into_iter()
                    .find(|d| d.matches(&allowed))
                    .map(|d| {
                        let permitted = provider.has_permission(&d);
                        (d, permitted)
                    }),
            )
        });

        let found = match tokio::time::timeout(self.config.open_timeout, lookup).await {
            Ok(Ok(Ok(found))) => found,
            Ok(Ok(Err(e))) => {
                self.fail(None, e.to_string());
                return;
            }
            Ok(Err(e)) => {
                self.fail(None, e.to_string());
                return;
            }
            Err(_) => {
                self.fail(None, LinkError::Timeout(self.config.open_timeout).to_string());
                return;
            }
        };

        let Some((device, permitted)) = found else {
            info!("No allowed devices found");
            self.transition(ConnectionState::NoDevicesFound);
            return;
        };

        info!("Selected {}", device);

        if permitted {
            self.connect(device).await;
            return;
        }

        if !self.enter(ConnectionState::RequestingPermission, Some(device.clone())) {
            debug!("Dropping {}: cycle ended during discovery", device);
            return;
        }
        if let Err(e) = self.provider.request_permission(&device) {
            warn!("Permission request for {} failed: {}", device, e);
            self.deny(&device.id);
        }
    }

    async fn connect(self: &Arc<Self>, device: DeviceHandle) {
        if !self.enter(ConnectionState::Connecting, Some(device.clone())) {
            return;
        }

        let provider = self.provider.clone();
        let params = self.config.params;
        let target = device.clone();
        let open = tokio::task::spawn_blocking(move || {
            let mut link = provider.open(&target)?;
            if let Err(e) = link.configure(&params) {
                if let Err(close_err) = link.close() {
                    warn!("Error closing unconfigured port: {}", close_err);
                }
                return Err(e);
            }
            Ok(link)
        });

        let mut link = match tokio::time::timeout(self.config.open_timeout, open).await {
            Ok(Ok(Ok(link))) => link,
            Ok(Ok(Err(e))) => {
                self.fail(None, e.to_string());
                return;
            }
            Ok(Err(e)) => {
                self.fail(None, e.to_string());
                return;
            }
            Err(_) => {
                self.fail(None, LinkError::Timeout(self.config.open_timeout).to_string());
                return;
            }
        };

        let mut slot = self.link.lock();
        if !self.transition(ConnectionState::Connected) {
            drop(slot);
            debug!("Discarding port for {}: cycle ended during open", device);
            if let Err(e) = link.close() {
                warn!("Error closing discarded port: {}", e);
            }
            return;
        }
        *slot = Some(link);
        info!("Connected to {} at {}", device, params);
    }

    /// Enter `Error(message)` and release the port and device
    fn fail(&self, link: Option<Box<dyn SerialLink>>, message: String) {
        error!("Connection error: {}", message);

        let link = link.or_else(|| self.link.lock().take());
        if let Some(mut link) = link {
            if let Err(e) = link.close() {
                warn!("Error closing port: {}", e);
            }
        }
        let mut device = self.device.lock();
        device.take();
        self.transition(ConnectionState::Error(message));
    }

    fn deny(&self, id: &DeviceId) {
        let mut device = self.device.lock();
        if device.as_ref().map(|d| &d.id) != Some(id) {
            return;
        }
        if self.transition(ConnectionState::PermissionDenied) {
            warn!("Permission denied for {}", id);
            device.take();
        }
    }

    /// Release port and device and enter `Disconnected`
    ///
    /// Holds the link slot throughout, the same as `connect` does while
    /// entering `Connected`, so a finishing open either lands before and is
    /// closed here or finds the cycle ended and discards its port.
    fn close(&self) {
        let mut link = self.link.lock();
        let mut device = self.device.lock();

        if let Some(mut open) = link.take() {
            if let Err(e) = open.close() {
                warn!("Error closing port: {}", e);
            }
        }
        if let Some(released) = device.take() {
            debug!("Released {}", released);
        }
        self.transition(ConnectionState::Disconnected);
    }

    fn holds(&self, id: &DeviceId) -> Option<DeviceHandle> {
        self.device.lock().as_ref().filter(|d| d.id == *id).cloned()
    }

    async fn handle_event(self: Arc<Self>, event: DeviceEvent) {
        match event {
            DeviceEvent::PermissionGranted(id) => {
                if self.state() != ConnectionState::RequestingPermission {
                    return;
                }
                if let Some(device) = self.holds(&id) {
                    info!("Permission granted for {}", device);
                    tokio::spawn(async move { self.connect(device).await });
                }
            }
            DeviceEvent::PermissionDenied(id) => {
                if self.state() == ConnectionState::RequestingPermission {
                    self.deny(&id);
                }
            }
            DeviceEvent::Detached(id) => {
                if let Some(device) = self.holds(&id) {
                    info!("Device detached: {}", device);
                    let inner = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || inner.close()).await {
                        error!("Close after detach failed: {}", e);
                    }
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

async fn listen(inner: Weak<Inner>, mut events: broadcast::Receiver<DeviceEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} device events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_live() {
            break;
        }
        inner.handle_event(event).await;
    }
}
