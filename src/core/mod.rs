//! Core module containing the main functionality of Termlink
//!
//! This module provides:
//! - CRC-8 checksum and event-code framing
//! - Timestamp source with a resettable relative baseline
//! - Buffered session event logger with CSV/JSON output
//! - Connection state machine
//! - Transport layer for USB serial devices
//! - Connection manager (discovery, permission, connect, framed I/O)
//! - Recorder feeding state changes into a session log

pub mod checksum;
pub mod clock;
pub mod connection;
pub mod frame;
pub mod logger;
pub mod recorder;
pub mod state;
pub mod transport;
