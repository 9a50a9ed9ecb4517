// Telemetry Submitter
// Posts named stream events to the metrics collector

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::models::Settings;
use crate::services::HttpTransport;

pub const DEFAULT_TELEMETRY_URL: &str = "https://data.stats.live-video.net/";
pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = "multitrack-output";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub type EventProperties = Map<String, Value>;

/// Delivers an encoded request body. Must not block the caller.
pub trait EventDelivery: Send + Sync {
    fn deliver(&self, url: &str, body: String);
}

/// Fire-and-forget delivery over HTTP on a tokio runtime
pub struct HttpDelivery {
    transport: Arc<dyn HttpTransport>,
    handle: tokio::runtime::Handle,
}

impl HttpDelivery {
    pub fn new(transport: Arc<dyn HttpTransport>, handle: tokio::runtime::Handle) -> Self {
        Self { transport, handle }
    }
}

impl EventDelivery for HttpDelivery {
    fn deliver(&self, url: &str, body: String) {
        let transport = Arc::clone(&self.transport);
        let url = url.to_string();
        self.handle.spawn(async move {
            let size = body.len();
            let headers = [("User-Agent", USER_AGENT), ("Content-Type", CONTENT_TYPE)];
            if let Err(e) = transport.post(&url, body, &headers, TELEMETRY_TIMEOUT).await {
                log::warn!("Could not submit {size} bytes to metrics backend {url}: {e}");
            }
        });
    }
}

/// Drops every event; used when telemetry is disabled
pub struct NoopDelivery;

impl EventDelivery for NoopDelivery {
    fn deliver(&self, _url: &str, _body: String) {}
}

/// Builds event bodies and hands them to a delivery.
///
/// "Always" properties are attached to every event until unset; an event's own
/// property of the same name takes precedence.
pub struct TelemetrySubmitter {
    url: String,
    delivery: Arc<dyn EventDelivery>,
    always: RwLock<EventProperties>,
}

impl TelemetrySubmitter {
    pub fn new(url: impl Into<String>, delivery: Arc<dyn EventDelivery>) -> Self {
        Self { url: url.into(), delivery, always: RwLock::new(Map::new()) }
    }

    /// HTTP delivery to the configured collector, or nothing when telemetry is off
    pub fn from_settings(
        settings: &Settings,
        transport: Arc<dyn HttpTransport>,
        handle: tokio::runtime::Handle,
    ) -> Self {
        if !settings.telemetry_enabled {
            log::info!("Telemetry disabled; stream events will not be submitted");
            return Self::new(settings.telemetry_url.clone(), Arc::new(NoopDelivery));
        }
        let url = match settings.telemetry_url.trim() {
            "" => DEFAULT_TELEMETRY_URL.to_string(),
            url => url.to_string(),
        };
        Self::new(url, Arc::new(HttpDelivery::new(transport, handle)))
    }

    pub fn set_always_string(&self, name: &str, value: &str) {
        self.set_always(name, Value::String(value.to_string()));
    }

    pub fn set_always_bool(&self, name: &str, value: bool) {
        self.set_always(name, Value::Bool(value));
    }

    fn set_always(&self, name: &str, value: Value) {
        if let Ok(mut always) = self.always.write() {
            always.insert(name.to_string(), value);
        }
    }

    pub fn unset_always(&self, name: &str) {
        if let Ok(mut always) = self.always.write() {
            always.remove(name);
        }
    }

    pub fn always(&self, name: &str) -> Option<Value> {
        self.always.read().ok().and_then(|always| always.get(name).cloned())
    }

    pub fn submit(&self, event_name: &str, properties: EventProperties) {
        let body = self.encode(event_name, properties);
        log::debug!("Submitting telemetry event {event_name}");
        self.delivery.deliver(&self.url, body);
    }

    /// `data=<base64 of [{"Name":..,"Properties":{..}}]>`
    fn encode(&self, event_name: &str, mut properties: EventProperties) -> String {
        if let Ok(always) = self.always.read() {
            for (key, value) in always.iter() {
                properties.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        let items = json!([{ "Name": event_name, "Properties": Value::Object(properties) }]);
        format!("data={}", BASE64.encode(items.to_string()))
    }
}

/// Decode a body produced by [`TelemetrySubmitter`] back into its event list
pub fn decode_body(body: &str) -> Option<Vec<Value>> {
    let encoded = body.strip_prefix("data=")?;
    let bytes = BASE64.decode(encoded).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}
