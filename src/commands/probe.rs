// Probe Command
// Asks the go-live endpoint for a config and describes the tracks it would produce

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{Capabilities, Fraction};
use crate::services::go_live_client::{build_post_data, GoLiveConfigClient, PostDataParams};
use crate::services::output_builder::build_service_target;
use crate::services::{AttemptClock, HttpTransport, Identity, MultitrackVideoError};

/// Inputs for a dry run against the go-live endpoint
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub config_url: String,
    pub stream_key: String,
    pub rtmp_url: Option<String>,
    pub maximum_aggregate_bitrate: Option<u64>,
    pub maximum_video_tracks: Option<u32>,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrackPlan {
    pub index: usize,
    pub encoder_type: String,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub framerate: Option<Fraction>,
    pub bitrate: Option<u64>,
    pub view: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackPlan {
    /// `live` or `vod`
    pub group: String,
    pub index: usize,
    pub bitrate: Option<u64>,
    pub channels: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub status: Option<String>,
    pub status_message: Option<String>,
    pub config_id: Option<String>,
    pub video_tracks: Vec<VideoTrackPlan>,
    pub audio_tracks: Vec<AudioTrackPlan>,
    /// RTMP server without the stream key
    pub ingest_server: Option<String>,
    /// The config supplied its own stream key
    pub key_from_config: bool,
    pub download_ms: u64,
}

/// Download the go-live config for this machine without creating any media objects
pub async fn probe_go_live_config(
    transport: Arc<dyn HttpTransport>,
    request: ProbeRequest,
    identity: &Identity,
) -> Result<ProbeReport, MultitrackVideoError> {
    let clock = AttemptClock::now();
    let post = build_post_data(PostDataParams {
        attempt_start_time: clock.iso_string(),
        stream_key: &request.stream_key,
        maximum_aggregate_bitrate: request.maximum_aggregate_bitrate,
        maximum_video_tracks: request.maximum_video_tracks,
        vod_track_enabled: false,
        video_info: None,
        extra_views: Vec::new(),
        capabilities: request.capabilities,
    });

    let started = Instant::now();
    let config = GoLiveConfigClient::new(transport)
        .download(&request.config_url, &post)
        .await?;
    let download_ms = started.elapsed().as_millis() as u64;

    let video_tracks = config
        .encoder_configurations()
        .map(|configs| configs.iter().enumerate().map(|(i, c)| video_track(i, c)).collect())
        .unwrap_or_default();

    let mut audio_tracks = Vec::new();
    if let Some(audio) = config.audio_configurations() {
        for group in ["live", "vod"] {
            let entries = audio.get(group).and_then(Value::as_array);
            for (index, entry) in entries.into_iter().flatten().enumerate() {
                audio_tracks.push(AudioTrackPlan {
                    group: group.to_string(),
                    index,
                    bitrate: entry.get("bitrate").and_then(Value::as_u64),
                    channels: entry.get("channels").and_then(Value::as_u64),
                });
            }
        }
    }

    let endpoints = config.ingest_endpoints();
    let key_from_config = endpoints
        .iter()
        .find(|e| e.is_rtmp())
        .and_then(|e| e.authentication.as_deref())
        .is_some_and(|auth| !auth.is_empty());

    let ingest_server = match build_service_target(
        &endpoints,
        request.rtmp_url.as_deref(),
        &request.stream_key,
        identity,
        config.config_id(),
    ) {
        Ok(target) => Some(target.server),
        Err(e) => {
            log::warn!("Go-live config has no usable ingest target: {e}");
            None
        }
    };

    let status = config.status();
    Ok(ProbeReport {
        status: status.as_ref().map(|s| s.result.clone()),
        status_message: status.and_then(|s| s.html_en_us),
        config_id: config.config_id().map(str::to_string),
        video_tracks,
        audio_tracks,
        ingest_server,
        key_from_config,
        download_ms,
    })
}

fn video_track(index: usize, config: &Value) -> VideoTrackPlan {
    VideoTrackPlan {
        index,
        encoder_type: config.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
        width: config.get("width").and_then(Value::as_u64),
        height: config.get("height").and_then(Value::as_u64),
        framerate: config.get("framerate").and_then(Fraction::from_value),
        bitrate: config.get("bitrate").and_then(Value::as_u64),
        view: config.get("view").and_then(Value::as_str).map(str::to_string),
    }
}
