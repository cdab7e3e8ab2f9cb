//! Configuration module
//!
//! Handles serial link and session log settings

mod settings;

pub use settings::{AppConfig, ConfigError, LinkSettings, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "termlink", "Termlink")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the session log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Create the config directory and the session log directory in use
///
/// Returns the log directory: `logging.directory` if set, otherwise
/// [`log_dir`].
pub fn init_directories(logging: &LoggingConfig) -> std::io::Result<PathBuf> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    ensure_log_dir(logging)
}

fn ensure_log_dir(logging: &LoggingConfig) -> std::io::Result<PathBuf> {
    let logs = logging.directory.clone().or_else(log_dir).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no log directory available")
    })?;
    std::fs::create_dir_all(&logs)?;
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_configured_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");
        let logging = LoggingConfig {
            directory: Some(logs.clone()),
            ..LoggingConfig::default()
        };

        assert_eq!(ensure_log_dir(&logging).unwrap(), logs);
        assert!(logs.is_dir());
    }
}
