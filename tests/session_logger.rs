//! Session log buffering and file output

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use termlink_core::core::logger::CSV_HEADER;
use termlink_core::{FileSink, LogEvent, LogFormat, Metadata, SessionLogger, TimeSource};

/// Clock that advances 10 ms per reading
struct SteppedClock {
    millis: AtomicU64,
}

impl SteppedClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(0),
        })
    }
}

impl TimeSource for SteppedClock {
    fn absolute_time(&self) -> String {
        "2024-05-01T12:00:00.000Z".to_string()
    }

    fn relative_millis(&self) -> u64 {
        self.millis.fetch_add(10, Ordering::SeqCst)
    }

    fn reset_relative(&self) {
        self.millis.store(0, Ordering::SeqCst);
    }
}

#[test]
fn csv_flush_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.csv");
    let logger = SessionLogger::new(LogFormat::Csv, SteppedClock::new());

    logger.log("BUTTON_PRESS");
    logger.log_event(
        "STATE_ERROR",
        Metadata::from([("state", "Error"), ("message", "busy")]),
    );

    assert!(logger.flush_to_file(&path, false));

    let contents = std::fs::read_to_string(&path).unwrap();
    let expected = format!(
        "{CSV_HEADER}\n\
         BUTTON_PRESS,2024-05-01T12:00:00.000Z,0,\n\
         STATE_ERROR,2024-05-01T12:00:00.000Z,10,state=Error;message=busy\n"
    );
    assert_eq!(contents, expected);
    assert_eq!(logger.event_count(), 2);
}

#[test]
fn json_flush_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let logger = SessionLogger::new(LogFormat::Json, SteppedClock::new());

    logger.log_event("BUTTON_PRESS", Metadata::from([("direction", "rx")]));
    logger.log("BUTTON_RELEASE");

    let mut sink = FileSink::new(&path);
    assert_eq!(logger.flush(&mut sink, true).unwrap(), 2);
    assert_eq!(logger.event_count(), 0);

    let parsed: Vec<LogEvent> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].event_code, "BUTTON_PRESS");
    assert_eq!(parsed[0].metadata.get("direction"), Some("rx"));
    assert_eq!(parsed[1].relative_time_ms, 10);
    assert!(parsed[1].metadata.is_empty());
}

#[test]
fn flush_replaces_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.csv");
    std::fs::write(&path, "stale data that is longer than the new log\n".repeat(10)).unwrap();

    let logger = SessionLogger::new(LogFormat::Csv, SteppedClock::new());
    logger.log("A");
    assert!(logger.flush_to_file(&path, true));

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with(CSV_HEADER));
    assert!(!contents.contains("stale"));
}

#[test]
fn failed_flush_keeps_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("session.csv");
    let logger = SessionLogger::new(LogFormat::Csv, SteppedClock::new());

    logger.log("BUTTON_PRESS");
    assert!(!logger.flush_to_file(&path, true));
    assert_eq!(logger.event_count(), 1);

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    assert!(logger.flush_to_file(&path, true));
    assert_eq!(logger.event_count(), 0);
}

#[test]
fn empty_flush_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.csv");
    let logger = SessionLogger::new(LogFormat::Csv, SteppedClock::new());

    assert!(logger.flush_to_file(&path, true));
    assert!(!path.exists());
}

#[test]
fn reset_rebases_relative_time() {
    let clock = SteppedClock::new();
    let logger = SessionLogger::new(LogFormat::Csv, clock.clone());

    logger.log("A");
    logger.log("B");
    clock.reset_relative();
    let event = logger.log("C");

    assert_eq!(event.relative_time_ms, 0);
}

#[test]
fn appends_during_flush_survive_clear() {
    let dir = tempfile::tempdir().unwrap();
    let logger = Arc::new(SessionLogger::new(LogFormat::Csv, SteppedClock::new()));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    logger.log_event("TICK", Metadata::from([("id", format!("{t}-{i}"))]));
                }
            })
        })
        .collect();

    let mut flushed = 0;
    for round in 0..20 {
        let path = dir.path().join(format!("round-{round}.csv"));
        let mut sink = FileSink::new(&path);
        flushed += logger.flush(&mut sink, true).unwrap();
    }

    for writer in writers {
        writer.join().unwrap();
    }

    let mut sink = FileSink::new(dir.path().join("final.csv"));
    flushed += logger.flush(&mut sink, true).unwrap();

    assert_eq!(flushed, 1000);
    assert_eq!(logger.event_count(), 0);
}
