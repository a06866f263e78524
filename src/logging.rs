//! Structured JSON-lines logging.
//!
//! One JSON object per line, written to a log file and mirrored to stdout.
//! Sensitive fields are redacted before anything is serialized; redaction is
//! this module's responsibility, not the call sites'.
//!
//! The logger is an injected capability, constructed by the runtime loop and
//! handed to collaborators; there is no process-global logger.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

pub trait Logger {
    fn log(&self, level: Level, event: &str, fields: Map<String, Value>);
}

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "api_secret", "signature"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

pub struct JsonlLogger {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlLogger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .with_context(|| format!("log dir create: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("log open: {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Logger for JsonlLogger {
    fn log(&self, level: Level, event: &str, fields: Map<String, Value>) {
        let fields = sanitize_fields(fields);
        let mut entry = Map::new();
        entry.insert("level".to_string(), json!(level.as_str()));
        entry.insert("event".to_string(), json!(event));
        entry.insert("ts".to_string(), json!(ts_now()));
        for (k, v) in fields {
            entry.insert(k, v);
        }
        let line = Value::Object(entry).to_string();
        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
        println!("{}", line);
    }
}

/// Swallows everything. For tests and for collaborators wired without a sink.
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Level, _event: &str, _fields: Map<String, Value>) {}
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
