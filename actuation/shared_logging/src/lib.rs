#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the actuation comparison crates.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Per-sample or per-report detail.
    Debug,
    /// Lifecycle events.
    Info,
    /// Recoverable anomalies (lagging subscribers, undecodable payloads).
    Warn,
    /// Fatal conditions.
    Error,
}

/// Structured log record, one per JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the record.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Short event name or message.
    pub message: String,
    /// Structured fields (counters, ids, values).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Merges the fields of a JSON object into the metadata; other values are stored under `data`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("data".into(), other);
            }
        }
        self
    }
}

/// Thread-safe append-only JSON-lines logger.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path, recording every level.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_min_level(path, LogLevel::Debug)
    }

    /// Creates or opens a logger that discards records below `min_level`.
    pub fn with_min_level(path: impl AsRef<Path>, min_level: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        Ok(Self {
            path,
            min_level,
            writer: Mutex::new(file),
        })
    }

    /// Writes a record as one JSON line. Records below the minimum level are skipped.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads back every record of a JSON-lines log file, skipping blank lines.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let reader = BufReader::new(
        File::open(path).with_context(|| format!("opening log file {}", path.display()))?,
    );
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed log record", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("nested/comparator.log")).unwrap();
        logger
            .log(&LogRecord::new("comparator", LogLevel::Info, "service.start"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"service.start\""));
        assert!(content.contains("\"level\":\"INFO\""));
    }

    #[test]
    fn min_level_filters_records() {
        let dir = tempdir().unwrap();
        let logger =
            JsonLogger::with_min_level(dir.path().join("filtered.log"), LogLevel::Info).unwrap();
        logger
            .log(&LogRecord::new("sampler", LogLevel::Debug, "report.emitted"))
            .unwrap();
        logger
            .log(&LogRecord::new("sampler", LogLevel::Warn, "subscriber.lagged"))
            .unwrap();
        let records = read_records(logger.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
    }

    #[test]
    fn metadata_merges_objects_and_wraps_scalars() {
        let record = LogRecord::new("ingest", LogLevel::Debug, "drop")
            .with_metadata(json!({ "sender_stamp": 7 }))
            .with_metadata(json!(3));
        assert_eq!(record.metadata["sender_stamp"], json!(7));
        assert_eq!(record.metadata["data"], json!(3));
    }
}
