//! Termlink - serial event session recorder
//!
//! Connects to the first allowed USB serial device, records every event code
//! it reports together with connection state changes, and writes the session
//! log to the log directory periodically and on Ctrl-C.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use termlink_core::config::{self, AppConfig, LoggingConfig};
use termlink_core::core::logger::log_file_name;
use termlink_core::utils::logging::init_tracing;
use termlink_core::{
    Clock, ConnectionConfig, ConnectionManager, ConnectionState, FileSink, Metadata,
    SerialportProvider, SessionLogger, SessionRecorder,
};
use tracing::{debug, error, info, warn};

/// Delay before retrying discovery after a cycle ends without a connection
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    info!("Starting Termlink v{}", termlink_core::VERSION);

    let app_config = AppConfig::load().context("loading configuration")?;
    let log_dir = config::init_directories(&app_config.logging)
        .context("creating application directories")?;
    info!("Session logs go to {}", log_dir.display());

    let logger = Arc::new(SessionLogger::new(app_config.logging.format, Clock::shared()));

    let provider = Arc::new(SerialportProvider::new());
    let _hotplug = provider.spawn_hotplug(app_config.link.hotplug_interval());
    let manager = ConnectionManager::new(provider, ConnectionConfig::from(&app_config.link));
    let mut recorder = SessionRecorder::spawn(&manager, logger.clone());

    manager.discover_devices();

    let reader = tokio::spawn(read_loop(manager.clone(), logger.clone()));
    let flusher = (app_config.logging.flush_interval_secs > 0).then(|| {
        tokio::spawn(flush_loop(
            logger.clone(),
            log_dir.clone(),
            app_config.logging.clone(),
        ))
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");

    reader.abort();
    if let Some(flusher) = flusher {
        flusher.abort();
    }

    let cleanup = manager.clone();
    tokio::task::spawn_blocking(move || cleanup.cleanup()).await?;
    recorder.stop();

    flush(&logger, &log_dir, &app_config.logging);
    Ok(())
}

async fn read_loop(manager: ConnectionManager, logger: Arc<SessionLogger>) {
    let mut states = manager.subscribe();

    loop {
        let state = states.borrow_and_update().clone();
        match state {
            ConnectionState::Connected => {
                let reader = manager.clone();
                match tokio::task::spawn_blocking(move || reader.read_event_code()).await {
                    Ok(Some(code)) => {
                        info!("Event: {}", code);
                        logger.log_event(&code, Metadata::from([("direction", "rx")]));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Read task failed: {}", e);
                        break;
                    }
                }
            }
            ConnectionState::Disconnected
            | ConnectionState::NoDevicesFound
            | ConnectionState::PermissionDenied
            | ConnectionState::Error(_) => {
                debug!("{}; retrying discovery in {:?}", state, RETRY_DELAY);
                tokio::time::sleep(RETRY_DELAY).await;
                manager.discover_devices();
            }
            ConnectionState::Discovering
            | ConnectionState::RequestingPermission
            | ConnectionState::Connecting => {
                if states.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn flush_loop(logger: Arc<SessionLogger>, dir: PathBuf, settings: LoggingConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(settings.flush_interval_secs));
    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let logger = logger.clone();
        let dir = dir.clone();
        let settings = settings.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || flush(&logger, &dir, &settings)).await
        {
            warn!("Flush task failed: {}", e);
        }
    }
}

fn flush(logger: &SessionLogger, dir: &Path, settings: &LoggingConfig) {
    let path = dir.join(log_file_name("session", logger.format()));
    let mut sink = FileSink::new(&path);

    match logger.flush(&mut sink, settings.clear_after_flush) {
        Ok(0) => debug!("Nothing to flush"),
        Ok(count) => info!("Wrote {} events to {}", count, path.display()),
        Err(e) => error!("Failed to write {}: {} (events kept)", path.display(), e),
    }
}
