// Go-Live Model
// Request body sent to the go-live endpoint and the configuration tree it returns

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Fraction;

pub const GO_LIVE_SERVICE: &str = "IVS";
pub const GO_LIVE_SCHEMA_VERSION: &str = "2024-06-04";
pub const CLIENT_NAME: &str = "obs-studio";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    pub physical_cores: i32,
    pub logical_cores: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub model: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
    pub shared_system_memory: u64,
    pub luid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GamingFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_bar_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_dvr_allowed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_dvr_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_dvr_bg_recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_mode_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hags_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemDetails {
    pub version: String,
    pub name: String,
    pub build: i32,
    pub release: String,
    pub revision: i32,
    pub bits: i32,
    pub arm: bool,
    #[serde(rename = "armEmulation")]
    pub arm_emulation: bool,
}

/// An auxiliary view announced to the go-live endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraViewInfo {
    pub name: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub fps: Fraction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub client: ClientInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gaming_features: Option<GamingFeatures>,
    pub system: SystemDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<Vec<GpuInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_views: Option<Vec<ExtraViewInfo>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_aggregate_bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_video_tracks: Option<u32>,
    pub vod_track_audio: bool,
    pub width: u32,
    pub height: u32,
    pub framerate: Option<Fraction>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_views: Option<Vec<ExtraViewInfo>>,
}

/// JSON body POSTed to the go-live endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoLivePost {
    pub service: String,
    pub schema_version: String,
    pub stream_attempt_start_time: String,
    pub authentication: String,
    pub capabilities: Capabilities,
    pub preferences: Preferences,
}

/// `status` block of a go-live response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStatus {
    #[serde(default)]
    pub result: String,
    #[serde(default, alias = "message")]
    pub html_en_us: Option<String>,
}

/// One entry of `ingest_endpoints`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEndpoint {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub url_template: String,
    #[serde(default)]
    pub authentication: Option<String>,
}

impl IngestEndpoint {
    pub fn is_rtmp(&self) -> bool {
        self.protocol
            .get(..4)
            .map(|prefix| prefix.eq_ignore_ascii_case("RTMP"))
            .unwrap_or(false)
    }
}

/// Configuration tree returned by the go-live endpoint.
///
/// Encoder and audio entries are kept as raw JSON objects because they are
/// handed through to the encoder runtime as settings blobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteConfig {
    root: Map<String, Value>,
}

impl RemoteConfig {
    pub fn from_map(root: Map<String, Value>) -> Self {
        Self { root }
    }

    /// Parse a JSON document; anything other than an object is rejected
    pub fn parse(text: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(_) => Err("Go-live config is not a JSON object".to_string()),
            Err(e) => Err(format!("Failed to parse go-live config: {e}")),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn status(&self) -> Option<ConfigStatus> {
        let status = self.root.get("status")?;
        serde_json::from_value(status.clone()).ok()
    }

    pub fn ingest_endpoints(&self) -> Vec<IngestEndpoint> {
        self.root
            .get("ingest_endpoints")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn encoder_configurations(&self) -> Option<&Vec<Value>> {
        self.root.get("encoder_configurations").and_then(|v| v.as_array())
    }

    pub fn encoder_configuration_count(&self) -> usize {
        self.encoder_configurations().map(|c| c.len()).unwrap_or(0)
    }

    /// `audio_configurations` object, if the server sent one
    pub fn audio_configurations(&self) -> Option<&Map<String, Value>> {
        self.root.get("audio_configurations").and_then(|v| v.as_object())
    }

    pub fn config_id(&self) -> Option<&str> {
        self.root
            .get("meta")
            .and_then(|meta| meta.get("config_id"))
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn set_config_id(&mut self, config_id: &str) {
        let meta = self
            .root
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert("config_id".to_string(), Value::String(config_id.to_string()));
        }
    }

    /// Replace each encoder's `bitrate_interpolation_points` with its compact
    /// JSON text, the form the encoder runtime expects.
    pub fn stringify_bitrate_interpolation_points(&mut self) {
        let Some(Value::Array(configs)) = self.root.get_mut("encoder_configurations") else {
            return;
        };
        for config in configs.iter_mut() {
            let Some(config) = config.as_object_mut() else {
                continue;
            };
            let Some(points) = config.get("bitrate_interpolation_points") else {
                continue;
            };
            if points.is_string() {
                continue;
            }
            let dumped = points.to_string();
            config.insert("bitrate_interpolation_points".to_string(), Value::String(dumped));
        }
    }
}
