//! Records connection state changes into a session log

use super::connection::ConnectionManager;
use super::logger::{Metadata, SessionLogger};
use super::state::ConnectionState;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Logs one event per observed connection state
///
/// States that change faster than the task runs may be coalesced.
pub struct SessionRecorder {
    task: Option<JoinHandle<()>>,
}

impl SessionRecorder {
    /// Start recording `manager`'s states into `logger`
    ///
    /// The current state is recorded immediately.
    pub fn spawn(manager: &ConnectionManager, logger: Arc<SessionLogger>) -> Self {
        let mut rx = manager.subscribe();
        let manager = manager.clone();

        let task = tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                let metadata = state_metadata(&state, &manager);
                logger.log_event(state.code(), metadata);

                if rx.changed().await.is_err() {
                    debug!("State channel closed, recorder stopping");
                    break;
                }
            }
        });

        Self { task: Some(task) }
    }

    /// Stop recording
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn state_metadata(state: &ConnectionState, manager: &ConnectionManager) -> Metadata {
    let mut metadata = Metadata::new().with("state", state.name());
    if let Some(message) = state.error_message() {
        metadata.insert("message", message);
    }
    if let Some(device) = manager.current_device() {
        metadata.insert("device", device.id.0);
    }
    metadata
}
