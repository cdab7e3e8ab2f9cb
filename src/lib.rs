//! # Termlink Core Library
//!
//! Session recording for a USB serial device that reports event codes:
//! - Device discovery over a vendor/product allow-list
//! - Permission negotiation and a connection state machine
//! - CRC-8 framed event-code exchange
//! - Timestamped, buffered session logging with CSV/JSON output
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use termlink_core::{
//!     Clock, ConnectionConfig, ConnectionManager, LogFormat, SerialportProvider, SessionLogger,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = Arc::new(SerialportProvider::new());
//!     let manager = ConnectionManager::new(provider, ConnectionConfig::default());
//!     let logger = SessionLogger::new(LogFormat::Csv, Clock::shared());
//!
//!     manager.discover_devices().await.ok();
//!     let mut states = manager.subscribe();
//!     states.wait_for(|s| s.is_connected()).await.ok();
//!
//!     let reader = manager.clone();
//!     let code = tokio::task::spawn_blocking(move || reader.read_event_code())
//!         .await
//!         .ok()
//!         .flatten();
//!     if let Some(code) = code {
//!         logger.log(&code);
//!     }
//!
//!     logger.flush_to_file("session.csv", true);
//!     manager.cleanup();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::config::{AppConfig, LinkSettings, LoggingConfig};
pub use crate::core::clock::{Clock, TimeSource};
pub use crate::core::connection::{ConnectionConfig, ConnectionManager};
pub use crate::core::frame::FrameError;
pub use crate::core::logger::{
    FileSink, LogError, LogEvent, LogFormat, LogSink, Metadata, SessionLogger,
};
pub use crate::core::recorder::SessionRecorder;
pub use crate::core::state::ConnectionState;
pub use crate::core::transport::{
    DeviceEvent, DeviceHandle, DeviceId, DeviceProvider, LinkError, LinkParams, SerialLink,
    SerialParity, SerialportProvider, UsbId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
