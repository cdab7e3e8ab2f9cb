//! Connection state machine
//!
//! ```text
//! Disconnected ──discover──► Discovering ──none──► NoDevicesFound
//!                               │   │
//!                  no permission│   │has permission
//!                               ▼   │
//!                RequestingPermission│──denied──► PermissionDenied
//!                        granted│   │
//!                               ▼   ▼
//!                             Connecting ──open fails──► Error(msg)
//!                                 │
//!                                 ▼
//!                             Connected ──detach / close──► Disconnected
//! ```
//!
//! `NoDevicesFound`, `PermissionDenied` and `Error` end a discovery cycle; a new
//! discovery may start from any of them. Any state may drop to `Disconnected`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No device held, no port open
    #[default]
    Disconnected,
    /// Listing candidate devices
    Discovering,
    /// Discovery found no allowed device
    NoDevicesFound,
    /// Waiting for the platform to answer a permission request
    RequestingPermission,
    /// Permission request refused
    PermissionDenied,
    /// Opening and configuring the port
    Connecting,
    /// Port open and configured
    Connected,
    /// Connection failed or was lost
    Error(String),
}

impl ConnectionState {
    /// Port is open and usable
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if transition is valid
    ///
    /// Any state may drop to `Disconnected`; otherwise the edges of the
    /// lifecycle diagram above are the only ones allowed.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;

        if *next == Disconnected {
            return true;
        }

        match self {
            // Start of a cycle
            Disconnected | NoDevicesFound | PermissionDenied | Error(_) => {
                matches!(next, Discovering)
            }
            Discovering => matches!(
                next,
                NoDevicesFound | RequestingPermission | Connecting | Error(_)
            ),
            RequestingPermission => matches!(next, Connecting | PermissionDenied),
            Connecting => matches!(next, Connected | Error(_)),
            Connected => matches!(next, Error(_)),
        }
    }

    /// Short name for display
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Discovering => "Discovering",
            Self::NoDevicesFound => "No devices found",
            Self::RequestingPermission => "Requesting permission",
            Self::PermissionDenied => "Permission denied",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error(_) => "Error",
        }
    }

    /// Stable event code for session logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "STATE_DISCONNECTED",
            Self::Discovering => "STATE_DISCOVERING",
            Self::NoDevicesFound => "STATE_NO_DEVICES_FOUND",
            Self::RequestingPermission => "STATE_REQUESTING_PERMISSION",
            Self::PermissionDenied => "STATE_PERMISSION_DENIED",
            Self::Connecting => "STATE_CONNECTING",
            Self::Connected => "STATE_CONNECTED",
            Self::Error(_) => "STATE_ERROR",
        }
    }

    /// Error message, if any
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            Self::Disconnected
            | Self::Discovering
            | Self::NoDevicesFound
            | Self::RequestingPermission
            | Self::PermissionDenied
            | Self::Connecting
            | Self::Connected => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "Error: {message}"),
            Self::Disconnected
            | Self::Discovering
            | Self::NoDevicesFound
            | Self::RequestingPermission
            | Self::PermissionDenied
            | Self::Connecting
            | Self::Connected => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_discovery_paths() {
        assert!(Disconnected.can_transition_to(&Discovering));
        assert!(Discovering.can_transition_to(&NoDevicesFound));
        assert!(Discovering.can_transition_to(&RequestingPermission));
        assert!(Discovering.can_transition_to(&Connecting));
        assert!(RequestingPermission.can_transition_to(&Connecting));
        assert!(RequestingPermission.can_transition_to(&PermissionDenied));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connecting.can_transition_to(&Error("boom".into())));
        assert!(Connected.can_transition_to(&Disconnected));
    }

    #[test]
    fn test_invalid_transition() {
        // Can't go directly from Disconnected to Connected
        assert!(!Disconnected.can_transition_to(&Connected));
        assert!(!Disconnected.can_transition_to(&Connecting));
        assert!(!Discovering.can_transition_to(&Connected));
        assert!(!PermissionDenied.can_transition_to(&Connecting));
        assert!(!Connected.can_transition_to(&Discovering));
    }

    #[test]
    fn test_retry_after_terminal_states() {
        for state in [NoDevicesFound, PermissionDenied, Error("x".into()), Disconnected] {
            assert!(state.can_transition_to(&Discovering));
        }
        for state in [Discovering, RequestingPermission, Connecting, Connected] {
            assert!(!state.can_transition_to(&Discovering));
        }
    }

    #[test]
    fn test_any_state_can_disconnect() {
        for state in [
            Disconnected,
            Discovering,
            NoDevicesFound,
            RequestingPermission,
            PermissionDenied,
            Connecting,
            Connected,
            Error("x".into()),
        ] {
            assert!(state.can_transition_to(&Disconnected), "{state}");
            assert_eq!(state.error_message().is_some(), matches!(state, Error(_)));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Connected.to_string(), "Connected");
        assert_eq!(Error("port busy".into()).to_string(), "Error: port busy");
        assert_eq!(Error("port busy".into()).error_message(), Some("port busy"));
        assert_eq!(RequestingPermission.code(), "STATE_REQUESTING_PERMISSION");
    }
}
