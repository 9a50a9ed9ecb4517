// Go-Live Config Client
// Requests the multitrack encoder layout from the go-live endpoint

use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    Capabilities, ExtraViewInfo, GoLivePost, Preferences, RemoteConfig, VideoOutputInfo,
    GO_LIVE_SCHEMA_VERSION, GO_LIVE_SERVICE,
};
use crate::services::{censored_json, HttpTransport, MultitrackVideoError, OperatorPrompt};

pub const GO_LIVE_TIMEOUT: Duration = Duration::from_secs(5);

const WARNING_RETRY_TEXT: &str = "\n\nDo you want to continue streaming anyway?";

/// Inputs for the go-live request body
pub struct PostDataParams<'a> {
    pub attempt_start_time: String,
    pub stream_key: &'a str,
    pub maximum_aggregate_bitrate: Option<u64>,
    pub maximum_video_tracks: Option<u32>,
    pub vod_track_enabled: bool,
    pub video_info: Option<VideoOutputInfo>,
    /// Started extra views with their geometry
    pub extra_views: Vec<(String, VideoOutputInfo)>,
    pub capabilities: Capabilities,
}

/// Build the JSON body POSTed to the go-live endpoint
pub fn build_post_data(params: PostDataParams<'_>) -> GoLivePost {
    let mut preferences = Preferences {
        maximum_aggregate_bitrate: params.maximum_aggregate_bitrate,
        maximum_video_tracks: params.maximum_video_tracks,
        vod_track_audio: params.vod_track_enabled,
        ..Preferences::default()
    };

    if let Some(ovi) = params.video_info {
        preferences.width = ovi.output_width;
        preferences.height = ovi.output_height;
        preferences.framerate = Some(ovi.frame_rate());
        preferences.canvas_width = ovi.base_width;
        preferences.canvas_height = ovi.base_height;
    }

    let mut capabilities = params.capabilities;
    if !params.extra_views.is_empty() {
        let views: Vec<ExtraViewInfo> = params
            .extra_views
            .iter()
            .map(|(name, info)| ExtraViewInfo {
                name: name.clone(),
                canvas_width: info.output_width,
                canvas_height: info.output_height,
                fps: info.frame_rate(),
            })
            .collect();
        capabilities.extra_views = Some(views.clone());
        preferences.extra_views = Some(views);
    }

    GoLivePost {
        service: GO_LIVE_SERVICE.to_string(),
        schema_version: GO_LIVE_SCHEMA_VERSION.to_string(),
        stream_attempt_start_time: params.attempt_start_time,
        authentication: params.stream_key.to_string(),
        capabilities,
        preferences,
    }
}

pub struct GoLiveConfigClient {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl GoLiveConfigClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport, timeout: GO_LIVE_TIMEOUT }
    }

    /// POST `post` to `url` and parse the returned configuration.
    ///
    /// Status is not interpreted here; see [`interpret_status`].
    pub async fn download(&self, url: &str, post: &GoLivePost) -> Result<RemoteConfig, MultitrackVideoError> {
        let post_value = serde_json::to_value(post)
            .map_err(|e| MultitrackVideoError::ConfigRequestFailed {
                url: url.to_string(),
                reason: format!("Failed to serialize request: {e}"),
            })?;
        log::info!("Go live POST data: {}", censored_json(&post_value));

        if url.is_empty() {
            return Err(MultitrackVideoError::MissingConfigUrl);
        }

        let headers = [("Content-Type", "application/json")];
        let text = self
            .transport
            .post(url, post_value.to_string(), &headers, self.timeout)
            .await
            .map_err(|e| {
                log::warn!("Go live config request to {url} failed: {e}");
                MultitrackVideoError::ConfigRequestFailed { url: url.to_string(), reason: e.to_string() }
            })?;

        let mut config = match RemoteConfig::parse(&text) {
            Ok(config) => config,
            Err(reason) => {
                log::warn!("{reason}; bitrate interpolation points not available");
                return Err(MultitrackVideoError::InvalidConfigResponse { reason, raw: text });
            }
        };
        config.stringify_bitrate_interpolation_points();

        log::info!("Go live Response data: {}", censored_json(&config.to_value()));
        Ok(config)
    }

    /// Download and classify in one step
    pub async fn fetch(
        &self,
        url: &str,
        post: &GoLivePost,
        prompt: &dyn OperatorPrompt,
    ) -> Result<RemoteConfig, MultitrackVideoError> {
        let config = self.download(url, post).await?;
        interpret_status(&config, prompt)?;
        Ok(config)
    }
}

/// Classify the server-reported status.
///
/// No status block, or a result starting with "success", passes. A warning
/// with encoder configurations asks the operator; without any it fails
/// before asking. An error always fails.
pub fn interpret_status(config: &RemoteConfig, prompt: &dyn OperatorPrompt) -> Result<(), MultitrackVideoError> {
    let Some(status) = config.status() else {
        return Ok(());
    };

    let message = status.html_en_us.clone().unwrap_or_default();
    if status.result.is_empty() || status.result.starts_with("success") {
        return Ok(());
    }

    if status.result == "warning" {
        if config.encoder_configuration_count() == 0 {
            log::warn!("Go live config warning without encoder configurations: {message}");
            return Err(MultitrackVideoError::ServerWarningWithoutEncoders(message));
        }
        log::warn!("Go live config warning: {message}");
        if !prompt.confirm_server_warning(&format!("{message}{WARNING_RETRY_TEXT}")) {
            log::info!("Operator declined to continue after go live config warning");
            return Err(MultitrackVideoError::Cancelled);
        }
        return Ok(());
    }

    if status.result == "error" {
        log::error!("Go live config error: {message}");
        return Err(MultitrackVideoError::ServerError(message));
    }

    Ok(())
}
