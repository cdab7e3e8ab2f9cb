//! Session event logging
//!
//! Events are stamped with absolute and relative time, kept in an in-memory
//! buffer, rendered as CSV or JSON, and flushed to a sink on demand.
//!
//! Appends and counts go through the buffer lock only. Clearing, formatting
//! and flushing serialize on a separate flush section, so producers never wait
//! on a sink write.

use super::clock::TimeSource;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// CSV header row
pub const CSV_HEADER: &str = "event_code,absolute_time,relative_time_ms,metadata";

/// Log output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Comma separated, one row per event
    #[default]
    Csv,
    /// Pretty-printed JSON array
    Json,
}

impl LogFormat {
    /// Get file extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Csv => "csv",
            LogFormat::Json => "json",
        }
    }

    /// Get all formats
    pub fn all() -> &'static [LogFormat] {
        &[LogFormat::Csv, LogFormat::Json]
    }
}

/// Logger error types
#[derive(Error, Debug)]
pub enum LogError {
    /// Sink I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Sink rejected the write
    #[error("Sink error: {0}")]
    Sink(String),
}

/// Ordered string metadata attached to an event
///
/// Keeps insertion order; serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    /// Empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value pair
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Append a key/value pair, replacing the value of an existing key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no pairs
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `key=value` pairs joined by `;`
    pub fn to_csv_field(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Metadata {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Metadata, A::Error> {
                let mut metadata = Metadata::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    metadata.insert(k, v);
                }
                Ok(metadata)
            }
        }

        deserializer.deserialize_map(MetadataVisitor)
    }
}

/// A single logged event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event code
    pub event_code: String,
    /// UTC wall-clock time
    pub absolute_time: String,
    /// Milliseconds since the clock baseline
    pub relative_time_ms: u64,
    /// Extra key/value pairs
    pub metadata: Metadata,
}

impl LogEvent {
    /// Format as CSV row
    ///
    /// Fields are written as-is; values containing commas are not escaped.
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{}",
            self.event_code,
            self.absolute_time,
            self.relative_time_ms,
            self.metadata.to_csv_field()
        )
    }
}

/// Render events in the given format
pub fn render(events: &[LogEvent], format: LogFormat) -> Result<String, LogError> {
    match format {
        LogFormat::Csv => {
            let mut result = String::with_capacity(CSV_HEADER.len() + 1 + events.len() * 64);
            result.push_str(CSV_HEADER);
            result.push('\n');
            for event in events {
                result.push_str(&event.to_csv());
                result.push('\n');
            }
            Ok(result)
        }
        LogFormat::Json => Ok(serde_json::to_string_pretty(events)?),
    }
}

/// Destination for flushed log contents
pub trait LogSink {
    /// Write the entire contents, all or nothing from the caller's view
    fn write_all(&mut self, contents: &str) -> Result<(), LogError>;
}

/// Sink writing to a file, replacing any previous contents atomically
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Create a sink for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write_all(&mut self, contents: &str) -> Result<(), LogError> {
        replace_file(&self.path, |writer| writer.write_all(contents.as_bytes()))?;
        Ok(())
    }
}

/// Replace `path` with whatever `write` produces, or leave it untouched
///
/// Contents go to a temporary file in the same directory, which is synced and
/// then renamed over `path`. On any error the temporary file is removed.
fn replace_file(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}

/// Buffered session event logger
pub struct SessionLogger {
    /// Event buffer
    events: RwLock<Vec<LogEvent>>,
    /// Serializes clear/format/flush
    flush_section: Mutex<()>,
    /// Output encoding
    format: LogFormat,
    /// Timestamp source
    clock: Arc<dyn TimeSource>,
}

impl SessionLogger {
    /// Create a logger with its own empty buffer
    pub fn new(format: LogFormat, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            flush_section: Mutex::new(()),
            format,
            clock,
        }
    }

    /// Configured output format
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Log an event without metadata
    pub fn log(&self, code: &str) -> LogEvent {
        self.log_event(code, Metadata::new())
    }

    /// Stamp and append an event, returning it
    pub fn log_event(&self, code: &str, metadata: Metadata) -> LogEvent {
        let event = LogEvent {
            event_code: code.to_string(),
            absolute_time: self.clock.absolute_time(),
            relative_time_ms: self.clock.relative_millis(),
            metadata,
        };

        self.events.write().push(event.clone());
        event
    }

    /// Number of buffered events
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Copy of the buffered events
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.read().clone()
    }

    /// Drop all buffered events
    pub fn clear_buffer(&self) {
        let _section = self.flush_section.lock();
        self.events.write().clear();
    }

    /// Render the whole buffer in the configured format
    pub fn formatted_log(&self) -> Result<String, LogError> {
        let _section = self.flush_section.lock();
        let snapshot = self.events.read().clone();
        render(&snapshot, self.format)
    }

    /// Write the buffer to `sink`
    ///
    /// Returns the number of events written; an empty buffer succeeds with 0
    /// without touching the sink. On failure the buffer is left untouched.
    /// When `clear_after` is set, exactly the written events are removed;
    /// events appended while the write was in progress stay buffered.
    pub fn flush(&self, sink: &mut dyn LogSink, clear_after: bool) -> Result<usize, LogError> {
        let _section = self.flush_section.lock();

        let snapshot = self.events.read().clone();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let contents = render(&snapshot, self.format)?;
        if let Err(e) = sink.write_all(&contents) {
            warn!("Flush of {} events failed: {}", snapshot.len(), e);
            return Err(e);
        }

        if clear_after {
            // Appends only extend the tail and removals hold the flush
            // section, so the snapshot is still the buffer prefix.
            self.events.write().drain(..snapshot.len());
        }

        debug!("Flushed {} events", snapshot.len());
        Ok(snapshot.len())
    }

    /// Flush to a file at `path`, reporting success
    pub fn flush_to_file(&self, path: impl Into<PathBuf>, clear_after: bool) -> bool {
        let mut sink = FileSink::new(path);
        self.flush(&mut sink, clear_after).is_ok()
    }
}

impl fmt::Debug for SessionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLogger")
            .field("format", &self.format)
            .field("events", &self.event_count())
            .finish_non_exhaustive()
    }
}

/// Generate log filename with timestamp
pub fn log_file_name(prefix: &str, format: LogFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}
