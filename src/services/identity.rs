// Identity
// Device and session identifiers attached to go-live requests and telemetry

use std::sync::OnceLock;

use crate::services::SettingsManager;

static DEVICE_ID: OnceLock<String> = OnceLock::new();
static SESSION_ID: OnceLock<String> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable across runs, persisted in settings
    pub device_id: String,
    /// Fresh for every process
    pub session_id: String,
}

impl Identity {
    pub fn new(device_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { device_id: device_id.into(), session_id: session_id.into() }
    }

    /// The process-wide identity. The device id is loaded (or generated and
    /// saved) on first use; both values are fixed afterwards.
    pub fn process(settings: &SettingsManager) -> Self {
        let device_id = DEVICE_ID.get_or_init(|| {
            settings.ensure_device_id().unwrap_or_else(|e| {
                log::warn!("Failed to persist device id, using a temporary one: {e}");
                uuid::Uuid::new_v4().to_string()
            })
        });
        Self::new(device_id.clone(), session_id())
    }
}

/// Identifier of this process's session
pub fn session_id() -> &'static str {
    SESSION_ID.get_or_init(|| uuid::Uuid::new_v4().to_string())
}
