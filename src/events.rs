//! Lifecycle events published to an external bus. Each event is a
//! `(type, payload)` pair; the payload is a flat JSON map so transports
//! can forward it without knowing the variants.

use crate::error::Result;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A viewer's source connected (or reconnected).
    LogConnected { viewer: String, source: String },
    /// A viewer's source disconnected, on stop, on stream end, or on
    /// idle eviction (`reason: "idle timeout"`).
    LogDisconnected {
        viewer: String,
        source: String,
        error: Option<String>,
        reason: Option<String>,
    },
    /// A source reported a runtime error. The viewer stays registered.
    LogError { viewer: String, error: String },
    /// A correlation search began executing in the background.
    TraceStarted {
        name: String,
        trace_id: String,
        group: String,
        log_viewers: Vec<String>,
    },
    /// A correlation search finished and its report was persisted.
    TraceCompleted {
        name: String,
        trace_id: String,
        group: String,
        total_entries: usize,
        duration_ms: u64,
        report_path: String,
    },
    /// A correlation search failed; a `failed` report was written if
    /// storage allowed it.
    TraceFailed {
        name: String,
        trace_id: String,
        group: String,
        error: String,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::LogConnected { .. } => "log.connected",
            Event::LogDisconnected { .. } => "log.disconnected",
            Event::LogError { .. } => "log.error",
            Event::TraceStarted { .. } => "trace.started",
            Event::TraceCompleted { .. } => "trace.completed",
            Event::TraceFailed { .. } => "trace.failed",
        }
    }

    pub fn payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Event::LogConnected { viewer, source } => {
                map.insert("viewer".into(), Value::String(viewer.clone()));
                map.insert("source".into(), Value::String(source.clone()));
            }
            Event::LogDisconnected { viewer, source, error, reason } => {
                map.insert("viewer".into(), Value::String(viewer.clone()));
                map.insert("source".into(), Value::String(source.clone()));
                if let Some(error) = error {
                    map.insert("error".into(), Value::String(error.clone()));
                }
                if let Some(reason) = reason {
                    map.insert("reason".into(), Value::String(reason.clone()));
                }
            }
            Event::LogError { viewer, error } => {
                map.insert("viewer".into(), Value::String(viewer.clone()));
                map.insert("error".into(), Value::String(error.clone()));
            }
            Event::TraceStarted { name, trace_id, group, log_viewers } => {
                map.insert("name".into(), Value::String(name.clone()));
                map.insert("trace_id".into(), Value::String(trace_id.clone()));
                map.insert("group".into(), Value::String(group.clone()));
                map.insert(
                    "log_viewers".into(),
                    Value::Array(log_viewers.iter().map(|v| Value::String(v.clone())).collect()),
                );
            }
            Event::TraceCompleted { name, trace_id, group, total_entries, duration_ms, report_path } => {
                map.insert("name".into(), Value::String(name.clone()));
                map.insert("trace_id".into(), Value::String(trace_id.clone()));
                map.insert("group".into(), Value::String(group.clone()));
                map.insert("total_entries".into(), Value::from(*total_entries));
                map.insert("duration_ms".into(), Value::from(*duration_ms));
                map.insert("report_path".into(), Value::String(report_path.clone()));
            }
            Event::TraceFailed { name, trace_id, group, error } => {
                map.insert("name".into(), Value::String(name.clone()));
                map.insert("trace_id".into(), Value::String(trace_id.clone()));
                map.insert("group".into(), Value::String(group.clone()));
                map.insert("error".into(), Value::String(error.clone()));
            }
        }
        map
    }
}

/// Sink for [`Event`]s. Implementations must not block the caller for
/// long — the manager publishes from its monitor tasks.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: Event) -> Result<()>;
}

/// A bus that discards every event. A manager built with `None` for its
/// bus behaves as if it had this one, so call sites never need to check
/// for a missing bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl EventBus for NoopBus {
    fn publish(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

/// Publishes through `bus` if present. A publish failure is logged and
/// swallowed: event delivery is best-effort and never aborts the
/// operation that produced the event.
pub fn publish_optional(bus: Option<&Arc<dyn EventBus>>, event: Event) {
    if let Some(bus) = bus {
        let event_type = event.event_type();
        if let Err(e) = bus.publish(event) {
            tracing::warn!(event = event_type, error = %e, "event bus publish failed");
        }
    }
}

#[cfg(test)]
mod __test__ {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus(Mutex<Vec<Event>>);

    impl EventBus for RecordingBus {
        fn publish(&self, event: Event) -> Result<()> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn connected() -> Event {
        Event::LogConnected { viewer: "app".to_string(), source: "file:/tmp/app.log".to_string() }
    }

    #[test]
    fn publish_optional_is_nil_safe() {
        publish_optional(None, connected());
    }

    #[test]
    fn publish_optional_forwards_to_present_bus() {
        let recording = Arc::new(RecordingBus::default());
        let bus: Arc<dyn EventBus> = recording.clone();
        publish_optional(Some(&bus), connected());
        assert_eq!(recording.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn payload_carries_optional_disconnect_fields_only_when_set() {
        let bare = Event::LogDisconnected {
            viewer: "app".to_string(),
            source: "s".to_string(),
            error: None,
            reason: None,
        };
        assert_eq!(bare.event_type(), "log.disconnected");
        assert!(!bare.payload().contains_key("error"));
        assert!(!bare.payload().contains_key("reason"));

        let evicted = Event::LogDisconnected {
            viewer: "app".to_string(),
            source: "s".to_string(),
            error: None,
            reason: Some("idle timeout".to_string()),
        };
        assert_eq!(evicted.payload().get("reason").unwrap(), "idle timeout");
    }

    #[test]
    fn trace_payloads_carry_identifiers() {
        let started = Event::TraceStarted {
            name: "abc-20240101-000000".to_string(),
            trace_id: "abc".to_string(),
            group: "api-flow".to_string(),
            log_viewers: vec!["nginx".to_string(), "api".to_string()],
        };
        let payload = started.payload();
        assert_eq!(payload.get("trace_id").unwrap(), "abc");
        assert_eq!(payload.get("log_viewers").unwrap().as_array().unwrap().len(), 2);
    }
}
