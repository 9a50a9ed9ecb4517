// Event Sink
// Delivers session state changes to whatever front end is attached

use serde::Serialize;
use serde_json::Value;

/// Receiver for named UI events such as `multitrack://state`
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}

/// Writes every event to the log; used by the command line front end
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &str, payload: Value) {
        log::info!(target: "events", "{event} {payload}");
    }
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit(event, value),
        Err(e) => log::warn!("Failed to serialize payload for {event}: {e}"),
    }
}
