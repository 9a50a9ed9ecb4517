// Settings Model
// Application-wide configuration

use serde::{Deserialize, Serialize};

fn default_log_retention_days() -> u32 {
    30
}

fn default_multitrack_video_name() -> String {
    "Multitrack Video".to_string()
}

fn default_recording_filename_format() -> String {
    "%Y-%m-%d %H-%M-%S".to_string()
}

fn default_telemetry_url() -> String {
    "https://data.stats.live-video.net/".to_string()
}

fn default_telemetry_enabled() -> bool {
    true
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // Identity (generated on first run, then persisted)
    #[serde(default)]
    pub device_id: String,

    // Go-live service
    #[serde(default)]
    pub multitrack_video_configuration_url: String,
    #[serde(default = "default_multitrack_video_name")]
    pub multitrack_video_name: String,
    #[serde(default)]
    pub multitrack_video_maximum_aggregate_bitrate: Option<u64>,
    #[serde(default)]
    pub multitrack_video_maximum_video_tracks: Option<u32>,
    /// Optional custom config (JSON text) replacing the downloaded one for encoder setup
    #[serde(default)]
    pub multitrack_video_custom_config: Option<String>,
    /// Optional RTMP URL overriding the ingest endpoint from the config
    #[serde(default)]
    pub multitrack_video_rtmp_url: Option<String>,

    // Output flags incompatible with multitrack video
    #[serde(default)]
    pub delay_enable: bool,
    #[serde(default)]
    pub new_socket_loop_enable: bool,
    #[serde(default)]
    pub dynamic_bitrate: bool,

    // Local dump of the multitrack stream
    #[serde(default)]
    pub record_stream_dump: bool,
    #[serde(default)]
    pub recording_path: String,
    #[serde(default = "default_recording_filename_format")]
    pub recording_filename_format: String,

    // Telemetry
    #[serde(default = "default_telemetry_enabled")]
    pub telemetry_enabled: bool,
    #[serde(default = "default_telemetry_url")]
    pub telemetry_url: String,

    // Log retention
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            multitrack_video_configuration_url: String::new(),
            multitrack_video_name: default_multitrack_video_name(),
            multitrack_video_maximum_aggregate_bitrate: None,
            multitrack_video_maximum_video_tracks: None,
            multitrack_video_custom_config: None,
            multitrack_video_rtmp_url: None,
            delay_enable: false,
            new_socket_loop_enable: false,
            dynamic_bitrate: false,
            record_stream_dump: false,
            recording_path: String::new(),
            recording_filename_format: default_recording_filename_format(),
            telemetry_enabled: default_telemetry_enabled(),
            telemetry_url: default_telemetry_url(),
            log_retention_days: default_log_retention_days(),
        }
    }
}
