// Stream Events
// Property sets for the lifecycle telemetry events

use serde_json::{json, Map, Value};

use crate::models::{Fraction, GoLivePost, RemoteConfig};
use crate::services::{AttemptClock, EventProperties, FrameCounts};

pub const STREAM_START: &str = "ivs_obs_stream_start";
pub const STREAM_START_FAILED: &str = "ivs_obs_stream_start_failed";
pub const STREAM_STARTED: &str = "ivs_obs_stream_started";
pub const STREAM_STOP: &str = "ivs_obs_stream_stop";
pub const STREAM_STOPPED: &str = "ivs_obs_stream_stopped";
pub const STREAM_MINUTE: &str = "ivs_obs_stream_minute";

fn props(value: Value) -> EventProperties {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn add_post_properties(event: &mut EventProperties, post: &GoLivePost) {
    let caps = &post.capabilities;
    let prefs = &post.preferences;
    event.extend(props(json!({
        "client_name": caps.client.name,
        "client_version": caps.client.version,
        "cpu_name": caps.cpu.name,
        "cpu_speed": caps.cpu.speed,
        "physical_cores": caps.cpu.physical_cores,
        "logical_cores": caps.cpu.logical_cores,
        "memory_total": caps.memory.total,
        "memory_free": caps.memory.free,
        "system_name": caps.system.name,
        "system_version": caps.system.version,
        "system_bits": caps.system.bits,
        "system_arm": caps.system.arm,
        "vod_track_audio": prefs.vod_track_audio,
        "canvas_width": prefs.canvas_width,
        "canvas_height": prefs.canvas_height,
        "output_width": prefs.width,
        "output_height": prefs.height,
        "fps_numerator": prefs.framerate.map(|f| f.num),
        "fps_denominator": prefs.framerate.map(|f| f.den),
        "maximum_aggregate_bitrate": prefs.maximum_aggregate_bitrate,
        "maximum_video_tracks": prefs.maximum_video_tracks,
        "extra_views": prefs.extra_views.as_ref().map(|views| views.len()).unwrap_or(0),
    })));
}

/// One `WxH@fps` entry per encoder configuration
fn describe_tracks(config: &RemoteConfig) -> String {
    config
        .encoder_configurations()
        .map(|configs| {
            configs
                .iter()
                .map(|c| {
                    let fps = c
                        .get("framerate")
                        .and_then(Fraction::from_value)
                        .map(|f| format!("{:.2}", f.num as f64 / f.den.max(1) as f64))
                        .unwrap_or_else(|| "?".to_string());
                    format!(
                        "{}x{}@{}",
                        c.get("width").and_then(|v| v.as_u64()).unwrap_or(0),
                        c.get("height").and_then(|v| v.as_u64()).unwrap_or(0),
                        fps
                    )
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

fn add_config_properties(event: &mut EventProperties, config: &RemoteConfig) {
    event.insert(
        "video_track_count".to_string(),
        json!(config.encoder_configuration_count()),
    );
    event.insert("video_tracks".to_string(), json!(describe_tracks(config)));
    if let Some(id) = config.config_id() {
        event.insert("config_id".to_string(), json!(id));
    }
}

fn attempt_event(
    post: Option<&GoLivePost>,
    config: Option<&RemoteConfig>,
    clock: &AttemptClock,
    download_time_ms: Option<u64>,
    start_streaming_returned_ms: u64,
) -> EventProperties {
    let mut event = Map::new();
    event.insert("stream_attempt_start_time".to_string(), json!(clock.iso_string()));
    event.insert("config_download_time_ms".to_string(), json!(download_time_ms));
    event.insert(
        "start_streaming_returned_ms".to_string(),
        json!(start_streaming_returned_ms),
    );
    if let Some(post) = post {
        add_post_properties(&mut event, post);
    }
    if let Some(config) = config {
        add_config_properties(&mut event, config);
    }
    event
}

pub fn stream_start(
    post: &GoLivePost,
    config: &RemoteConfig,
    clock: &AttemptClock,
    download_time_ms: u64,
    start_streaming_returned_ms: u64,
    connect_time_ms: Option<i64>,
) -> EventProperties {
    let mut event = attempt_event(
        Some(post),
        Some(config),
        clock,
        Some(download_time_ms),
        start_streaming_returned_ms,
    );
    event.insert("connect_time_ms".to_string(), json!(connect_time_ms));
    event
}

pub fn stream_start_failed(
    post: Option<&GoLivePost>,
    config: Option<&RemoteConfig>,
    clock: &AttemptClock,
    download_time_ms: Option<u64>,
    start_streaming_returned_ms: u64,
    error: Option<&str>,
) -> EventProperties {
    let mut event = attempt_event(post, config, clock, download_time_ms, start_streaming_returned_ms);
    if let Some(error) = error {
        event.insert("client_error".to_string(), json!(error));
    }
    event
}

pub fn stream_started(elapsed_ms: u64) -> EventProperties {
    props(json!({ "start_to_started_ms": elapsed_ms }))
}

pub fn stream_stop(server_error: Option<&str>) -> EventProperties {
    let mut event = Map::new();
    if let Some(error) = server_error {
        event.insert("server_error".to_string(), json!(error));
    }
    event
}

/// `code` is `None` when the output stopped cleanly
pub fn stream_stopped(code: Option<i64>, last_error: Option<&str>) -> EventProperties {
    let mut event = props(json!({ "success": code.is_none() }));
    if let Some(code) = code {
        event.insert("code".to_string(), json!(code));
    }
    if let Some(error) = last_error.filter(|e| !e.is_empty()) {
        event.insert("last_error".to_string(), json!(error));
    }
    event
}

pub fn stream_minute(seconds_since_start: u64, encoders: &[(String, Option<FrameCounts>)]) -> EventProperties {
    let mut event = props(json!({ "seconds_since_start": seconds_since_start }));
    for (index, (name, counts)) in encoders.iter().enumerate() {
        event.insert(format!("encoder_{index}_name"), json!(name));
        if let Some(counts) = counts {
            event.insert(format!("encoder_{index}_frames_encoded"), json!(counts.encoded));
            event.insert(format!("encoder_{index}_frames_lagged"), json!(counts.lagged));
        }
    }
    event
}
