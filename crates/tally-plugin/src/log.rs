// crates/tally-plugin/src/log.rs
// ============================================================================
// Module: Plugin Logging
// Description: Structured log events and sinks for plugin processes.
// Purpose: Emit JSON-lines logs without ever touching stdout.
// Dependencies: serde, serde_json, tally-config
// ============================================================================

//! ## Overview
//! Stdout belongs to the handshake, so plugin logs are JSON lines written to
//! stderr, an append-only file, or nowhere. Sinks are selected from
//! [`LogConfig`] and shared behind `Arc<dyn PluginLogSink>`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tally_config::LogConfig;
use tally_config::LogSinkKind;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Log event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginLogLevel {
    /// Routine lifecycle and call events.
    Info,
    /// Recoverable failures.
    Warn,
    /// Panics and fatal conditions.
    Error,
}

/// Plugin log event payload.
#[derive(Debug, Clone, Serialize)]
pub struct PluginLogEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity.
    pub level: PluginLogLevel,
    /// Human-readable message.
    pub message: String,
    /// RPC method when the event relates to a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl PluginLogEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event: &'static str, level: PluginLogLevel, message: impl Into<String>) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            level,
            message: message.into(),
            method: None,
        }
    }

    /// Creates an info event.
    #[must_use]
    pub fn info(event: &'static str, message: impl Into<String>) -> Self {
        Self::new(event, PluginLogLevel::Info, message)
    }

    /// Creates a warning event.
    #[must_use]
    pub fn warn(event: &'static str, message: impl Into<String>) -> Self {
        Self::new(event, PluginLogLevel::Warn, message)
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(event: &'static str, message: impl Into<String>) -> Self {
        Self::new(event, PluginLogLevel::Error, message)
    }

    /// Attaches the RPC method name.
    #[must_use]
    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Log sink for plugin events.
pub trait PluginLogSink: Send + Sync {
    /// Record a log event.
    fn record(&self, event: &PluginLogEvent);
}

/// Log sink that writes JSON lines to stderr.
pub struct StderrLogSink;

impl PluginLogSink for StderrLogSink {
    fn record(&self, event: &PluginLogEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Log sink that appends JSON lines to a file.
pub struct FileLogSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileLogSink {
    /// Opens the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl PluginLogSink for FileLogSink {
    fn record(&self, event: &PluginLogEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op log sink.
pub struct NoopLogSink;

impl PluginLogSink for NoopLogSink {
    fn record(&self, _event: &PluginLogEvent) {}
}

/// In-memory sink that keeps every event, for inspection in tests.
#[derive(Default)]
pub struct MemoryLogSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<PluginLogEvent>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<PluginLogEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the recorded events with the given identifier.
    #[must_use]
    pub fn events_named(&self, event: &str) -> Vec<PluginLogEvent> {
        self.events().into_iter().filter(|recorded| recorded.event == event).collect()
    }
}

impl PluginLogSink for MemoryLogSink {
    fn record(&self, event: &PluginLogEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

/// Builds the sink selected by `config`.
///
/// # Errors
///
/// Returns an error when the file sink cannot open its path.
pub fn log_sink_from_config(config: &LogConfig) -> io::Result<Arc<dyn PluginLogSink>> {
    match config.sink {
        LogSinkKind::Stderr => Ok(Arc::new(StderrLogSink)),
        LogSinkKind::None => Ok(Arc::new(NoopLogSink)),
        LogSinkKind::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "file log sink requires log.path")
            })?;
            Ok(Arc::new(FileLogSink::new(Path::new(path.trim()))?))
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
