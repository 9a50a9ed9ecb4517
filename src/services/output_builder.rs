// Output Builder
// Creates the network output, optional recording output and their encoders from a go-live config

use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::models::{Fraction, IngestEndpoint, RemoteConfig, ScaleType, Settings, SpeakerLayout};
use crate::services::{
    AudioEncoder, Identity, MediaRuntime, MultitrackVideoError, Output, Service, VideoEncoder,
    VideoSource,
};

pub const STREAM_OUTPUT_TYPE: &str = "rtmp_output";
pub const STREAM_OUTPUT_NAME: &str = "rtmp multitrack video";
pub const RECORDING_OUTPUT_TYPE: &str = "flv_output";
pub const RECORDING_OUTPUT_NAME: &str = "flv multitrack video";
pub const SERVICE_TYPE: &str = "rtmp_custom";
pub const SERVICE_NAME: &str = "multitrack video service";

const STREAM_KEY_PLACEHOLDER: &str = "/{stream_key}";

/// What to build
pub struct BuildRequest<'a> {
    pub config: &'a RemoteConfig,
    /// Started extra views, addressable by an encoder config's `view`
    pub extra_views: &'a [(String, Arc<dyn VideoSource>)],
    pub audio_encoder_id: &'a str,
    /// Used when an audio entry carries no bitrate of its own
    pub audio_bitrate: Option<u32>,
    pub vod_track_mixer: Option<usize>,
    /// Settings for the local recording output; `None` skips it
    pub recording_settings: Option<Value>,
}

/// Outputs with every encoder attached
pub struct BuiltOutputs {
    pub output: Arc<dyn Output>,
    pub recording_output: Option<Arc<dyn Output>>,
    pub video_encoders: Vec<Arc<dyn VideoEncoder>>,
    pub audio_encoders: Vec<Arc<dyn AudioEncoder>>,
}

/// A failed build with the objects created before the failure
pub struct BuildFailure {
    pub error: MultitrackVideoError,
    pub partial: Option<BuiltOutputs>,
}

impl std::fmt::Debug for BuildFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildFailure")
            .field("error", &self.error)
            .field("partial", &self.partial.is_some())
            .finish()
    }
}

/// RTMP target handed to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub server: String,
    pub key: String,
}

pub struct OutputBuilder {
    runtime: Arc<dyn MediaRuntime>,
    encoder_types: OnceLock<Vec<String>>,
}

impl OutputBuilder {
    pub fn new(runtime: Arc<dyn MediaRuntime>) -> Self {
        Self { runtime, encoder_types: OnceLock::new() }
    }

    /// Encoder types are only registered at startup, so one query is enough
    fn encoder_available(&self, encoder_type: &str) -> bool {
        self.encoder_types
            .get_or_init(|| self.runtime.encoder_types())
            .iter()
            .any(|t| t == encoder_type)
    }

    pub fn build(&self, req: &BuildRequest<'_>) -> Result<BuiltOutputs, BuildFailure> {
        let output = self
            .runtime
            .create_output(STREAM_OUTPUT_TYPE, STREAM_OUTPUT_NAME, None)
            .ok_or_else(|| {
                log::error!("Failed to create multitrack video rtmp output");
                BuildFailure {
                    error: MultitrackVideoError::OutputCreation(STREAM_OUTPUT_NAME.to_string()),
                    partial: None,
                }
            })?;

        let recording_output = req.recording_settings.as_ref().and_then(|settings| {
            let recording = self
                .runtime
                .create_output(RECORDING_OUTPUT_TYPE, RECORDING_OUTPUT_NAME, Some(settings));
            if recording.is_none() {
                log::error!("Failed to create multitrack video flv output");
            }
            recording
        });

        let mut built = BuiltOutputs {
            output,
            recording_output,
            video_encoders: Vec::new(),
            audio_encoders: Vec::new(),
        };
        let result = self
            .create_video_encoders(req, &mut built)
            .and_then(|()| self.create_audio_encoders(req, &mut built));

        match result {
            Ok(()) => Ok(built),
            Err(error) => Err(BuildFailure { error, partial: Some(built) }),
        }
    }

    fn create_video_encoders(
        &self,
        req: &BuildRequest<'_>,
        built: &mut BuiltOutputs,
    ) -> Result<(), MultitrackVideoError> {
        let configs = match req.config.encoder_configurations() {
            Some(configs) if !configs.is_empty() => configs,
            _ => {
                log::warn!("Missing video encoder configurations");
                return Err(MultitrackVideoError::MissingEncoderConfigs("video"));
            }
        };

        for (index, config) in configs.iter().enumerate() {
            let config = config.as_object().cloned().unwrap_or_default();
            let encoder = self.create_video_encoder(index, config, req.extra_views)?;

            if let Some(first) = built.video_encoders.first() {
                self.runtime.group_keyframe_aligned(first, &encoder);
            }

            built.output.set_video_encoder(Arc::clone(&encoder), index);
            if let Some(recording) = &built.recording_output {
                recording.set_video_encoder(Arc::clone(&encoder), index);
            }
            built.video_encoders.push(encoder);
        }
        Ok(())
    }

    fn create_video_encoder(
        &self,
        index: usize,
        mut config: Map<String, Value>,
        extra_views: &[(String, Arc<dyn VideoSource>)],
    ) -> Result<Arc<dyn VideoEncoder>, MultitrackVideoError> {
        let encoder_type = config.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
        if !self.encoder_available(&encoder_type) {
            log::error!("Encoder type '{encoder_type}' not available");
            return Err(MultitrackVideoError::EncoderNotAvailable(encoder_type));
        }

        let Some(canvas) = self.runtime.video_info() else {
            log::warn!("Failed to get video info while creating encoder {index}");
            return Err(MultitrackVideoError::VideoInfoUnavailable(index));
        };

        let name = format!("multitrack video video encoder {index}");
        normalize_keyint(&name, &mut config);
        config.insert("disable_scenecut".to_string(), Value::Bool(true));

        let encoder = self
            .runtime
            .create_video_encoder(&encoder_type, &name, &Value::Object(config.clone()))
            .ok_or_else(|| {
                log::error!("Failed to create video encoder '{name}'");
                MultitrackVideoError::VideoEncoderCreation { index, reason: encoder_type.clone() }
            })?;

        let view_name = config.get("view").and_then(Value::as_str);
        let view = view_name.and_then(|wanted| {
            extra_views
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, source)| Arc::clone(source))
        });

        // An extra view is compared against its own output size, the canvas against its base size
        let (available, source_rate) = match view.as_ref().and_then(|v| v.info()) {
            Some(info) => ((info.output_width, info.output_height), info.frame_rate()),
            None => ((canvas.base_width, canvas.base_height), canvas.frame_rate()),
        };
        encoder.set_video(view.unwrap_or_else(|| self.runtime.main_video()));

        let requested_width = config.get("width").and_then(Value::as_u64).unwrap_or(0) as u32;
        let requested_height = config.get("height").and_then(Value::as_u64).unwrap_or(0) as u32;
        if available.0 < requested_width || available.1 < requested_height {
            log::warn!(
                "Requested resolution exceeds canvas/available resolution for encoder {index}: {requested_width}x{requested_height} > {}x{} (canvas: {})",
                available.0,
                available.1,
                view_name.unwrap_or("base")
            );
        }
        encoder.set_scaled_size(requested_width, requested_height);
        encoder.set_gpu_scale_type(load_gpu_scale_type(&config));

        if let Some(divisor) = frame_rate_divisor(source_rate, &config, index) {
            log::info!("Setting frame rate divisor to {divisor} for encoder {index}");
            encoder.set_frame_rate_divisor(divisor);
        }

        Ok(encoder)
    }

    fn create_audio_encoders(
        &self,
        req: &BuildRequest<'_>,
        built: &mut BuiltOutputs,
    ) -> Result<(), MultitrackVideoError> {
        let attach = |built: &mut BuiltOutputs, encoder: Arc<dyn AudioEncoder>, index: usize| {
            built.output.set_audio_encoder(Arc::clone(&encoder), index);
            if let Some(recording) = &built.recording_output {
                recording.set_audio_encoder(Arc::clone(&encoder), index);
            }
            built.audio_encoders.push(encoder);
        };

        let Some(audio_configs) = req.config.audio_configurations() else {
            let encoder = self.create_audio_encoder(
                "multitrack video live audio",
                req.audio_encoder_id,
                req.audio_bitrate,
                0,
                0,
            )?;
            attach(built, encoder, 0);
            return Ok(());
        };

        let device_speakers = self
            .runtime
            .audio_info()
            .map(|info| info.speakers)
            .unwrap_or_default();

        let mut groups = vec![("multitrack video live audio", audio_configs.get("live"), 0)];
        if let Some(mixer) = req.vod_track_mixer {
            groups.push(("multitrack video vod audio", audio_configs.get("vod"), mixer));
        }

        for (prefix, entries, mixer) in groups {
            let entries = match entries.and_then(Value::as_array) {
                Some(entries) if !entries.is_empty() => entries,
                _ => {
                    log::warn!("Missing audio encoder configurations (for '{prefix}')");
                    return Err(MultitrackVideoError::MissingEncoderConfigs("audio"));
                }
            };

            for (i, entry) in entries.iter().enumerate() {
                let bitrate = entry
                    .get("bitrate")
                    .and_then(Value::as_u64)
                    .map(|b| b as u32)
                    .or(req.audio_bitrate);
                let index = built.audio_encoders.len();
                let encoder = self.create_audio_encoder(
                    &format!("{prefix} {i}"),
                    req.audio_encoder_id,
                    bitrate,
                    mixer,
                    index,
                )?;

                if let Some(channels) = entry.get("channels").and_then(Value::as_u64) {
                    sanitize_audio_channels(&encoder, channels as u32, device_speakers);
                }

                attach(built, encoder, index);
            }
        }

        Ok(())
    }

    fn create_audio_encoder(
        &self,
        name: &str,
        encoder_id: &str,
        bitrate: Option<u32>,
        mixer: usize,
        index: usize,
    ) -> Result<Arc<dyn AudioEncoder>, MultitrackVideoError> {
        let settings = bitrate.map(|bitrate| json!({ "bitrate": bitrate }));
        self.runtime
            .create_audio_encoder(encoder_id, name, settings.as_ref(), mixer)
            .ok_or_else(|| {
                log::error!("Failed to create audio encoder '{name}'");
                MultitrackVideoError::AudioEncoderCreation { index, reason: encoder_id.to_string() }
            })
    }

    /// Create the RTMP service carrying `target`
    pub fn create_service(&self, target: &ServiceTarget) -> Result<Arc<dyn Service>, MultitrackVideoError> {
        let settings = json!({ "server": target.server, "key": target.key });
        self.runtime
            .create_service(SERVICE_TYPE, SERVICE_NAME, &settings)
            .ok_or_else(|| {
                log::error!("Failed to create multitrack video service");
                MultitrackVideoError::ServiceCreation
            })
    }
}

/// Copy a misspelled `keyInt_sec` into `keyint_sec` unless the latter is already set
fn normalize_keyint(encoder_name: &str, config: &mut Map<String, Value>) {
    if config.contains_key("keyint_sec") {
        return;
    }
    if let Some(value) = config.get("keyInt_sec").cloned() {
        log::info!("Fixing go-live config for encoder '{encoder_name}': keyInt_sec -> keyint_sec");
        config.insert("keyint_sec".to_string(), value);
    }
}

/// Resolve `gpu_scale_type` given as a code (1-5) or a name; bicubic otherwise
pub fn load_gpu_scale_type(config: &Map<String, Value>) -> ScaleType {
    let Some(value) = config.get("gpu_scale_type") else {
        return ScaleType::default();
    };

    let resolved = match value {
        Value::Number(n) => {
            let code = n.as_i64().unwrap_or(0);
            let scale = ScaleType::from_code(code);
            if scale.is_none() {
                log::warn!("gpu_scale_type out of range {code} (must be 1 <= value <= 5)");
            }
            scale
        }
        Value::String(name) => {
            let scale = ScaleType::from_name(name);
            if scale.is_none() {
                log::warn!("Unknown gpu_scale_type: '{name}'");
            }
            scale
        }
        other => {
            log::warn!("Unsupported gpu_scale_type value: {other}");
            None
        }
    };
    resolved.unwrap_or_default()
}

/// `floor(source / target)`, at least 1
pub fn closest_divisor(source: Fraction, target: Fraction) -> u32 {
    let target_scaled = target.num as u64 * source.den as u64;
    let source_scaled = source.num as u64 * target.den as u64;
    if target_scaled == 0 {
        return 1;
    }
    (source_scaled / target_scaled).max(1) as u32
}

/// Divisor to apply for the config's `framerate`, if one is useful
pub fn frame_rate_divisor(source: Fraction, config: &Map<String, Value>, index: usize) -> Option<u32> {
    let Some(requested) = config.get("framerate").and_then(Fraction::from_value) else {
        log::warn!("`framerate` not specified for encoder {index}");
        return None;
    };

    if requested == source {
        return None;
    }

    Some(closest_divisor(source, requested)).filter(|divisor| *divisor > 1)
}

fn sanitize_audio_channels(encoder: &Arc<dyn AudioEncoder>, channels: u32, device: SpeakerLayout) {
    let Some(layout) = SpeakerLayout::from_channels(channels) else {
        log::warn!(
            "Could not find speaker layout for {channels} channels while configuring encoder '{}'",
            encoder.name()
        );
        return;
    };
    if device != SpeakerLayout::Unknown && channels > device.channels() {
        return;
    }

    encoder.set_speaker_layout(layout);
    log::info!("Setting encoder '{}' to {channels} channels", encoder.name());
}

/// Derive the RTMP server and key for the session.
///
/// The first RTMP ingest endpoint provides the URL (and the key, when it
/// carries one) unless `rtmp_url` overrides it.
pub fn build_service_target(
    endpoints: &[IngestEndpoint],
    rtmp_url: Option<&str>,
    stream_key: &str,
    identity: &Identity,
    config_id: Option<&str>,
) -> Result<ServiceTarget, MultitrackVideoError> {
    let mut url: Option<&str> = None;
    let mut key = stream_key.to_string();

    if let Some(endpoint) = endpoints.iter().find(|e| e.is_rtmp()) {
        url = Some(endpoint.url_template.as_str());
        if let Some(auth) = endpoint.authentication.as_deref().filter(|a| !a.is_empty()) {
            log::info!("Using stream key supplied by go-live config");
            key = auth.to_string();
        }
    }

    let url = match rtmp_url {
        Some("") => {
            log::error!("Custom RTMP URL is set but empty");
            return Err(MultitrackVideoError::EmptyCustomRtmpUrl);
        }
        Some(custom) => {
            log::info!("Using custom RTMP URL: '{custom}'");
            custom
        }
        None => {
            let Some(template) = url.filter(|u| !u.is_empty()) else {
                log::error!("No RTMP URL in go-live config");
                return Err(MultitrackVideoError::NoRtmpUrl);
            };
            log::info!("Using URL template: '{template}'");
            template
        }
    };

    let server = match url.find(STREAM_KEY_PLACEHOLDER) {
        Some(pos) => &url[..pos],
        None => url,
    };

    let mut query = format!(
        "deviceIdentifier={}&obsSessionId={}",
        urlencoding::encode(&identity.device_id),
        urlencoding::encode(&identity.session_id)
    );
    if let Some(config_id) = config_id.filter(|id| !id.is_empty()) {
        query.push_str(&format!("&obsConfigId={}", urlencoding::encode(config_id)));
    }

    Ok(ServiceTarget { server: server.to_string(), key: format!("{key}?{query}") })
}

/// `<directory>/<formatted local time>.flv`, creating the directory if needed
pub fn recording_output_path(directory: &str, format: &str) -> Result<PathBuf, String> {
    let mut file_name = String::new();
    write!(file_name, "{}", chrono::Local::now().format(format))
        .map_err(|_| format!("Invalid recording filename format: {format}"))?;

    let mut path = directory.replace('\\', "/");
    if !path.is_empty() && !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(&file_name);
    path.push_str(".flv");

    let path = PathBuf::from(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create recording directory: {e}"))?;
    }
    Ok(path)
}

/// Settings for the local stream dump, or `None` when dumping is off.
///
/// An empty recording path falls back to the user's video directory.
pub fn recording_settings(settings: &Settings) -> Result<Option<Value>, String> {
    if !settings.record_stream_dump {
        return Ok(None);
    }

    let directory = if settings.recording_path.trim().is_empty() {
        dirs_next::video_dir()
            .or_else(dirs_next::home_dir)
            .ok_or_else(|| "No recording directory available".to_string())?
            .to_string_lossy()
            .to_string()
    } else {
        settings.recording_path.clone()
    };

    let path = recording_output_path(&directory, &settings.recording_filename_format)?;
    log::info!("Recording multitrack stream dump to {}", path.display());
    Ok(Some(json!({ "path": path.to_string_lossy() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{video_info, FakeRuntime, FakeVideoSource};
    use tempfile::TempDir;

    fn config(value: Value) -> RemoteConfig {
        RemoteConfig::parse(&value.to_string()).unwrap()
    }

    fn request<'a>(cfg: &'a RemoteConfig, views: &'a [(String, Arc<dyn VideoSource>)]) -> BuildRequest<'a> {
        BuildRequest {
            config: cfg,
            extra_views: views,
            audio_encoder_id: "ffmpeg_aac",
            audio_bitrate: Some(160),
            vod_track_mixer: None,
            recording_settings: None,
        }
    }

    fn encoder_config(width: u32, height: u32, fps: u32) -> Value {
        json!({
            "type": "obs_x264",
            "width": width,
            "height": height,
            "framerate": {"numerator": fps, "denominator": 1}
        })
    }

    #[test]
    fn test_closest_divisor() {
        assert_eq!(closest_divisor(Fraction::new(60, 1), Fraction::new(30, 1)), 2);
        assert_eq!(closest_divisor(Fraction::new(60, 1), Fraction::new(60, 1)), 1);
        assert_eq!(closest_divisor(Fraction::new(48, 1), Fraction::new(24100, 1000)), 1);
        assert_eq!(closest_divisor(Fraction::new(60, 1), Fraction::new(0, 1)), 1);
    }

    #[test]
    fn test_frame_rate_divisor_only_applied_above_one() {
        let cfg = |fps: Value| json!({ "framerate": fps }).as_object().cloned().unwrap();
        let source = Fraction::new(60, 1);
        assert_eq!(frame_rate_divisor(source, &cfg(json!(30)), 0), Some(2));
        assert_eq!(frame_rate_divisor(source, &cfg(json!(60)), 0), None);
        assert_eq!(frame_rate_divisor(Fraction::new(48, 1), &cfg(json!(24.1)), 0), None);
        assert_eq!(frame_rate_divisor(source, &Map::new(), 0), None);
    }

    #[test]
    fn test_gpu_scale_type() {
        let cfg = |v: Value| json!({ "gpu_scale_type": v }).as_object().cloned().unwrap();
        assert_eq!(load_gpu_scale_type(&Map::new()), ScaleType::Bicubic);
        assert_eq!(load_gpu_scale_type(&cfg(json!(4))), ScaleType::Lanczos);
        assert_eq!(load_gpu_scale_type(&cfg(json!(9))), ScaleType::Bicubic);
        assert_eq!(load_gpu_scale_type(&cfg(json!("OBS_SCALE_AREA"))), ScaleType::Area);
        assert_eq!(load_gpu_scale_type(&cfg(json!("nearest"))), ScaleType::Bicubic);
        assert_eq!(load_gpu_scale_type(&cfg(json!(true))), ScaleType::Bicubic);
    }

    #[test]
    fn test_two_encoders_make_one_grouping() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60), encoder_config(1280, 720, 30)]
        }));
        let built = builder.build(&request(&cfg, &[])).unwrap();

        assert_eq!(built.video_encoders.len(), 2);
        assert_eq!(
            *runtime.groupings.lock().unwrap(),
            vec![(
                "multitrack video video encoder 0".to_string(),
                "multitrack video video encoder 1".to_string()
            )]
        );
        assert_eq!(runtime.video_encoder(0).divisor(), None);
        assert_eq!(runtime.video_encoder(1).divisor(), Some(2));
        assert_eq!(runtime.video_encoder(1).scaled_size(), Some((1280, 720)));
        assert_eq!(runtime.video_encoder(1).scale_type(), Some(ScaleType::Bicubic));
    }

    #[test]
    fn test_single_encoder_makes_no_grouping() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [encoder_config(1920, 1080, 60)] }));
        builder.build(&request(&cfg, &[])).unwrap();
        assert_eq!(runtime.grouping_count(), 0);
    }

    #[test]
    fn test_missing_video_configs_creates_no_encoder() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [] }));
        let err = builder.build(&request(&cfg, &[])).err().unwrap().error;
        assert_eq!(err, MultitrackVideoError::MissingEncoderConfigs("video"));
        assert!(runtime.video_encoders.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_encoder_type() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [{"type": "jim_nvenc"}] }));
        let err = builder.build(&request(&cfg, &[])).err().unwrap().error;
        assert_eq!(err, MultitrackVideoError::EncoderNotAvailable("jim_nvenc".into()));
    }

    #[test]
    fn test_encoder_types_queried_once() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60), encoder_config(1280, 720, 60)]
        }));
        builder.build(&request(&cfg, &[])).unwrap();
        builder.build(&request(&cfg, &[])).unwrap();
        assert_eq!(runtime.encoder_type_queries.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keyint_normalization_and_scenecut() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [
            {"type": "obs_x264", "keyInt_sec": 2},
            {"type": "obs_x264", "keyInt_sec": 2, "keyint_sec": 4}
        ]}));
        builder.build(&request(&cfg, &[])).unwrap();

        let first = runtime.video_encoder(0);
        assert_eq!(first.settings["keyint_sec"], 2);
        assert_eq!(first.settings["disable_scenecut"], true);
        assert_eq!(runtime.video_encoder(1).settings["keyint_sec"], 4);
    }

    #[test]
    fn test_view_selects_extra_source() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let vertical = video_info(720, 1280, 30);
        let views: Vec<(String, Arc<dyn VideoSource>)> = vec![(
            "vertical".to_string(),
            FakeVideoSource::new("vertical", Some(vertical)) as Arc<dyn VideoSource>,
        )];
        let cfg = config(json!({ "encoder_configurations": [
            {"type": "obs_x264", "view": "vertical", "width": 720, "height": 1280,
             "framerate": {"numerator": 30, "denominator": 1}},
            {"type": "obs_x264", "view": "missing", "width": 640, "height": 360}
        ]}));
        builder.build(&request(&cfg, &views)).unwrap();

        assert_eq!(runtime.video_encoder(0).source_info(), Some(vertical));
        assert_eq!(runtime.video_encoder(0).divisor(), None);
        assert_eq!(runtime.video_encoder(1).source_info(), runtime.video_info());
    }

    #[test]
    fn test_oversized_resolution_is_kept() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [encoder_config(3840, 2160, 60)] }));
        builder.build(&request(&cfg, &[])).unwrap();
        assert_eq!(runtime.video_encoder(0).scaled_size(), Some((3840, 2160)));
    }

    #[test]
    fn test_missing_video_info() {
        let runtime = Arc::new(FakeRuntime::default());
        *runtime.video.lock().unwrap() = None;
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [encoder_config(1920, 1080, 60)] }));
        let failure = builder.build(&request(&cfg, &[])).err().unwrap();
        assert_eq!(failure.error, MultitrackVideoError::VideoInfoUnavailable(0));
        assert!(runtime.video_encoders.lock().unwrap().is_empty());
        let partial = failure.partial.unwrap();
        assert!(partial.video_encoders.is_empty());
        assert_eq!(runtime.live_output_count(), 1);
        drop(partial);
        assert_eq!(runtime.live_output_count(), 0);
    }

    #[test]
    fn test_default_audio_track() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [encoder_config(1920, 1080, 60)] }));
        let built = builder.build(&request(&cfg, &[])).unwrap();

        assert_eq!(built.audio_encoders.len(), 1);
        let audio = runtime.audio_encoder(0);
        assert_eq!(audio.name, "multitrack video live audio");
        assert_eq!(audio.mixer, 0);
        assert_eq!(audio.settings, Some(json!({"bitrate": 160})));
        assert_eq!(audio.layout(), None);
    }

    #[test]
    fn test_vod_tracks_continue_index() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60)],
            "audio_configurations": {
                "live": [{"bitrate": 128}, {"channels": 1}],
                "vod": [{"bitrate": 96}]
            }
        }));
        let mut req = request(&cfg, &[]);
        req.vod_track_mixer = Some(2);
        let built = builder.build(&req).unwrap();

        let names = built.output.name();
        assert_eq!(names, STREAM_OUTPUT_NAME);
        assert_eq!(built.audio_encoders.len(), 3);
        let vod = runtime.audio_encoder(2);
        assert_eq!(vod.name, "multitrack video vod audio 0");
        assert_eq!(vod.mixer, 2);
        assert_eq!(vod.settings, Some(json!({"bitrate": 96})));
        assert_eq!(runtime.audio_encoder(1).settings, Some(json!({"bitrate": 160})));
        assert_eq!(runtime.audio_encoder(1).layout(), Some(SpeakerLayout::Mono));

        let output = runtime.output(STREAM_OUTPUT_TYPE).unwrap();
        let indexes: Vec<usize> = output.audio_encoder_names().iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_vod_ignored_without_mixer() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60)],
            "audio_configurations": { "live": [{"bitrate": 128}], "vod": [] }
        }));
        let built = builder.build(&request(&cfg, &[])).unwrap();
        assert_eq!(built.audio_encoders.len(), 1);
    }

    #[test]
    fn test_empty_live_audio_is_missing_configs() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60)],
            "audio_configurations": { "live": [] }
        }));
        let failure = builder.build(&request(&cfg, &[])).err().unwrap();
        assert_eq!(failure.error, MultitrackVideoError::MissingEncoderConfigs("audio"));
        // video encoders made before the audio failure are handed back
        let partial = failure.partial.unwrap();
        assert_eq!(partial.video_encoders.len(), 1);
        assert!(partial.audio_encoders.is_empty());
    }

    #[test]
    fn test_channels_above_device_keep_default_layout() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60)],
            "audio_configurations": { "live": [{"channels": 6}, {"channels": 7}, {"channels": 2}] }
        }));
        builder.build(&request(&cfg, &[])).unwrap();
        assert_eq!(runtime.audio_encoder(0).layout(), None);
        assert_eq!(runtime.audio_encoder(1).layout(), None);
        assert_eq!(runtime.audio_encoder(2).layout(), Some(SpeakerLayout::Stereo));
    }

    #[test]
    fn test_recording_output_shares_encoders() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({
            "encoder_configurations": [encoder_config(1920, 1080, 60), encoder_config(1280, 720, 60)]
        }));
        let mut req = request(&cfg, &[]);
        req.recording_settings = Some(json!({"path": "/tmp/x.flv"}));
        let built = builder.build(&req).unwrap();

        assert!(built.recording_output.is_some());
        let stream = runtime.output(STREAM_OUTPUT_TYPE).unwrap();
        let recording = runtime.output(RECORDING_OUTPUT_TYPE).unwrap();
        assert_eq!(stream.video_encoder_names(), recording.video_encoder_names());
        assert_eq!(stream.audio_encoder_names(), recording.audio_encoder_names());
        assert_eq!(runtime.video_encoders.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_recording_output_failure_is_not_fatal() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.failing_output_types.lock().unwrap().push(RECORDING_OUTPUT_TYPE.to_string());
        let builder = OutputBuilder::new(runtime.clone());
        let cfg = config(json!({ "encoder_configurations": [encoder_config(1920, 1080, 60)] }));
        let mut req = request(&cfg, &[]);
        req.recording_settings = Some(json!({}));
        let built = builder.build(&req).unwrap();
        assert!(built.recording_output.is_none());
    }

    fn identity() -> Identity {
        Identity::new("dev 1", "sess")
    }

    fn rtmp(url: &str, auth: Option<&str>) -> IngestEndpoint {
        IngestEndpoint {
            protocol: "RTMPS".into(),
            url_template: url.into(),
            authentication: auth.map(str::to_string),
        }
    }

    #[test]
    fn test_service_target_from_endpoint() {
        let endpoints = vec![
            IngestEndpoint { protocol: "SRT".into(), url_template: "srt://x".into(), authentication: None },
            rtmp("rtmps://ingest.example/app/{stream_key}", None),
        ];
        let target = build_service_target(&endpoints, None, "key", &identity(), Some("cfg 9")).unwrap();
        assert_eq!(target.server, "rtmps://ingest.example/app");
        assert_eq!(target.key, "key?deviceIdentifier=dev%201&obsSessionId=sess&obsConfigId=cfg%209");
    }

    #[test]
    fn test_service_target_endpoint_key_and_override() {
        let endpoints = vec![rtmp("rtmp://a/{stream_key}", Some("server_key"))];
        let target =
            build_service_target(&endpoints, Some("rtmp://custom/live"), "key", &identity(), None).unwrap();
        assert_eq!(target.server, "rtmp://custom/live");
        assert!(target.key.starts_with("server_key?"));
        assert!(!target.key.contains("obsConfigId"));
    }

    #[test]
    fn test_service_target_errors() {
        assert_eq!(
            build_service_target(&[], None, "k", &identity(), None).unwrap_err(),
            MultitrackVideoError::NoRtmpUrl
        );
        assert_eq!(
            build_service_target(&[rtmp("rtmp://a", None)], Some(""), "k", &identity(), None).unwrap_err(),
            MultitrackVideoError::EmptyCustomRtmpUrl
        );
    }

    #[test]
    fn test_create_service_settings() {
        let runtime = Arc::new(FakeRuntime::default());
        let builder = OutputBuilder::new(runtime.clone());
        let target = ServiceTarget { server: "rtmp://a".into(), key: "k?q".into() };
        let service = builder.create_service(&target).unwrap();
        assert_eq!(service.settings(), json!({"server": "rtmp://a", "key": "k?q"}));

        runtime.fail_service.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(builder.create_service(&target).err(), Some(MultitrackVideoError::ServiceCreation));
    }

    #[test]
    fn test_recording_output_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("dumps").join("today");
        let path = recording_output_path(nested.to_str().unwrap(), "stream-%Y").unwrap();

        assert!(nested.is_dir());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("stream-"));
        assert!(name.ends_with(".flv"));
    }

    #[test]
    fn test_recording_settings() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings {
            recording_path: dir.path().to_string_lossy().to_string(),
            recording_filename_format: "dump".to_string(),
            ..Settings::default()
        };
        assert_eq!(recording_settings(&settings).unwrap(), None);

        settings.record_stream_dump = true;
        let value = recording_settings(&settings).unwrap().unwrap();
        assert!(value["path"].as_str().unwrap().ends_with("dump.flv"));
    }
}
