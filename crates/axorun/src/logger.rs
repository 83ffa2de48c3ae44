//! # Log Service
//!
//! A remotely callable logging surface. Entries are forwarded to the
//! process tracing subscriber and kept in memory for inspection, so a
//! peer can both emit and audit log traffic through the same channel.

use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::service::MethodMap;
use crate::service::Service;

/// Severities accepted by the remote logging surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

/// A captured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub template: String,
    pub properties: Option<Value>,
}

/// Remotely callable logger.
#[derive(Default)]
pub struct LogService {
    entries: Mutex<Vec<LogEntry>>,
}

impl LogService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self, level: LogLevel, template: &str, properties: Option<Value>) {
        match level {
            LogLevel::Verbose => trace!(template, ?properties, "remote log"),
            LogLevel::Debug => debug!(template, ?properties, "remote log"),
            LogLevel::Information => info!(template, ?properties, "remote log"),
            LogLevel::Warning => warn!(template, ?properties, "remote log"),
            LogLevel::Error | LogLevel::Fatal => error!(template, ?properties, "remote log"),
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                template: template.to_string(),
                properties,
            });
        }
    }

    /// Every entry captured so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|entries| entries.clone()).unwrap_or_default()
    }
}

impl Service for LogService {
    fn methods(self: Arc<Self>) -> MethodMap {
        let service = self;
        MethodMap::new().with_sync("log", move |params| {
            let mut params = params.into_iter();
            let level = params
                .next()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or(LogLevel::Information);
            let template = match params.next() {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let properties = params.next();
            service.log(level, &template, properties);
            Ok(Value::Null)
        })
    }
}
