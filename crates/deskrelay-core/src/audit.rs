// crates/deskrelay-core/src/audit.rs
// ============================================================================
// Module: Deskrelay Audit Logging
// Description: Structured JSON-line audit events and sinks.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every component records what it did as one JSON object per line. Sinks are
//! lightweight so deployments can route events to their preferred logging
//! pipeline. Secret values never appear in events; callers log fingerprints.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::time::unix_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Emitting component.
    pub component: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u64,
    /// Event-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(component: &'static str, event: &'static str) -> Self {
        Self {
            event,
            component,
            timestamp_ms: unix_millis(),
            fields: Map::new(),
        }
    }

    /// Adds a field. Values that fail to serialize are recorded as null.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for structured events.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuditEvent);
}

/// Shared audit sink handle.
pub type SharedAuditSink = Arc<dyn AuditSink>;

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that writes JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// Output file guarded by a mutex.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens (or creates) the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
        }
    }
}

/// Audit sink that drops all events.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Audit sink that keeps events in memory for inspection.
#[derive(Default)]
pub struct InMemoryAuditSink {
    /// Recorded events.
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the names of recorded events in order.
    #[must_use]
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.event).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions.")]

    use super::*;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(&AuditEvent::new("gateway", "auth_denied").with("peer", "10.0.0.1"));
        sink.record(&AuditEvent::new("gateway", "auth_allowed"));
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "auth_denied");
        assert_eq!(first["peer"], "10.0.0.1");
        assert_eq!(first["component"], "gateway");
    }

    #[test]
    fn memory_sink_collects_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(&AuditEvent::new("agent", "executed"));
        assert_eq!(sink.event_names(), vec!["executed"]);
    }
}
