// Test Doubles
// In-memory runtime, transport, prompt and telemetry fakes for unit tests

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::models::{AudioOutputInfo, ScaleType, SpeakerLayout, VideoOutputInfo};
use crate::services::integrity::{HashMismatch, LoadedModule};
use crate::services::telemetry::{decode_body, EventDelivery};
use crate::services::{
    AudioEncoder, EventSink, ExtraViewProvider, FrameCounts, HttpTransport, IncompatibleSetting,
    IncompatibleSettingsChoice, MediaRuntime, OperatorPrompt, Output, OutputSignal, Service,
    SignalCallback, SignalConnection, SignalData, TransportError, VideoEncoder, VideoSource,
};

pub fn video_info(width: u32, height: u32, fps: u32) -> VideoOutputInfo {
    VideoOutputInfo {
        base_width: width,
        base_height: height,
        output_width: width,
        output_height: height,
        fps_num: fps,
        fps_den: 1,
    }
}

// ============================================================================
// Media objects
// ============================================================================

pub struct FakeVideoSource {
    pub label: String,
    pub info: Option<VideoOutputInfo>,
}

impl FakeVideoSource {
    pub fn new(label: &str, info: Option<VideoOutputInfo>) -> Arc<Self> {
        Arc::new(Self { label: label.to_string(), info })
    }
}

impl VideoSource for FakeVideoSource {
    fn info(&self) -> Option<VideoOutputInfo> {
        self.info
    }
}

#[derive(Default)]
pub struct VideoEncoderState {
    pub source: Option<Arc<dyn VideoSource>>,
    pub scaled_size: Option<(u32, u32)>,
    pub scale_type: Option<ScaleType>,
    pub divisor: Option<u32>,
}

pub struct FakeVideoEncoder {
    pub name: String,
    pub settings: Value,
    pub state: Mutex<VideoEncoderState>,
}

impl FakeVideoEncoder {
    pub fn new(name: &str, settings: Value) -> Self {
        Self { name: name.to_string(), settings, state: Mutex::new(VideoEncoderState::default()) }
    }

    pub fn scaled_size(&self) -> Option<(u32, u32)> {
        self.state.lock().unwrap().scaled_size
    }

    pub fn scale_type(&self) -> Option<ScaleType> {
        self.state.lock().unwrap().scale_type
    }

    pub fn divisor(&self) -> Option<u32> {
        self.state.lock().unwrap().divisor
    }

    pub fn source_info(&self) -> Option<VideoOutputInfo> {
        self.state.lock().unwrap().source.as_ref().and_then(|s| s.info())
    }
}

impl VideoEncoder for FakeVideoEncoder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_video(&self, source: Arc<dyn VideoSource>) {
        self.state.lock().unwrap().source = Some(source);
    }

    fn set_scaled_size(&self, width: u32, height: u32) {
        self.state.lock().unwrap().scaled_size = Some((width, height));
    }

    fn set_gpu_scale_type(&self, scale_type: ScaleType) {
        self.state.lock().unwrap().scale_type = Some(scale_type);
    }

    fn set_frame_rate_divisor(&self, divisor: u32) {
        self.state.lock().unwrap().divisor = Some(divisor);
    }

    fn frame_counts(&self) -> Option<FrameCounts> {
        Some(FrameCounts { encoded: 60, lagged: 0 })
    }
}

pub struct FakeAudioEncoder {
    pub name: String,
    pub settings: Option<Value>,
    pub mixer: usize,
    pub layout: Mutex<Option<SpeakerLayout>>,
}

impl FakeAudioEncoder {
    pub fn layout(&self) -> Option<SpeakerLayout> {
        *self.layout.lock().unwrap()
    }
}

impl AudioEncoder for FakeAudioEncoder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_speaker_layout(&self, layout: SpeakerLayout) {
        *self.layout.lock().unwrap() = Some(layout);
    }
}

pub struct FakeService {
    pub settings: Value,
}

impl Service for FakeService {
    fn settings(&self) -> Value {
        self.settings.clone()
    }
}

type CallbackList = Mutex<Vec<(u64, OutputSignal, SignalCallback)>>;

/// Disconnects its callback from a [`FakeOutput`] when dropped
pub struct FakeConnection {
    id: u64,
    callbacks: Weak<CallbackList>,
}

impl SignalConnection for FakeConnection {}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.lock().unwrap().retain(|(id, _, _)| *id != self.id);
        }
    }
}

#[derive(Default)]
pub struct OutputState {
    pub service: Option<Arc<dyn Service>>,
    pub video_encoders: Vec<(usize, String)>,
    pub audio_encoders: Vec<(usize, String)>,
    pub bpm: bool,
    pub starts: usize,
    pub stops: usize,
}

pub struct FakeOutput {
    pub output_type: String,
    pub name: String,
    pub state: Mutex<OutputState>,
    pub is_active: AtomicBool,
    pub is_reconnecting: AtomicBool,
    pub start_result: AtomicBool,
    callbacks: Arc<CallbackList>,
    next_id: AtomicU64,
}

impl FakeOutput {
    pub fn new(output_type: &str, name: &str) -> Self {
        Self {
            output_type: output_type.to_string(),
            name: name.to_string(),
            state: Mutex::new(OutputState::default()),
            is_active: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            start_result: AtomicBool::new(true),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn connected_signals(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn video_encoder_names(&self) -> Vec<(usize, String)> {
        self.state.lock().unwrap().video_encoders.clone()
    }

    pub fn audio_encoder_names(&self) -> Vec<(usize, String)> {
        self.state.lock().unwrap().audio_encoders.clone()
    }

    pub fn service_settings(&self) -> Option<Value> {
        self.state.lock().unwrap().service.as_ref().map(|s| s.settings())
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    /// Invoke every callback connected to `signal`, like the runtime would
    pub fn fire(self: &Arc<Self>, signal: OutputSignal, code: i64, last_error: Option<&str>) {
        let callbacks: Vec<SignalCallback> = self
            .callbacks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s, _)| *s == signal)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        let data = SignalData {
            output: Arc::clone(self) as Arc<dyn Output>,
            code,
            last_error: last_error.map(str::to_string),
        };
        for callback in callbacks {
            callback(&data);
        }
    }
}

impl Output for FakeOutput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_service(&self, service: Arc<dyn Service>) {
        self.state.lock().unwrap().service = Some(service);
    }

    fn set_video_encoder(&self, encoder: Arc<dyn VideoEncoder>, index: usize) {
        self.state.lock().unwrap().video_encoders.push((index, encoder.name()));
    }

    fn set_audio_encoder(&self, encoder: Arc<dyn AudioEncoder>, index: usize) {
        self.state.lock().unwrap().audio_encoders.push((index, encoder.name()));
    }

    fn enable_bpm(&self, enabled: bool) {
        self.state.lock().unwrap().bpm = enabled;
    }

    fn start(&self) -> bool {
        self.state.lock().unwrap().starts += 1;
        let started = self.start_result.load(Ordering::SeqCst);
        if started {
            self.is_active.store(true, Ordering::SeqCst);
        }
        started
    }

    fn stop(&self) {
        self.state.lock().unwrap().stops += 1;
    }

    fn active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    fn reconnecting(&self) -> bool {
        self.is_reconnecting.load(Ordering::SeqCst)
    }

    fn connect_time_ms(&self) -> Option<i64> {
        Some(42)
    }

    fn connect_signal(&self, signal: OutputSignal, callback: SignalCallback) -> Box<dyn SignalConnection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().unwrap().push((id, signal, callback));
        Box::new(FakeConnection { id, callbacks: Arc::downgrade(&self.callbacks) })
    }
}

// ============================================================================
// Runtime
// ============================================================================

pub struct FakeRuntime {
    pub encoder_types: Vec<String>,
    pub encoder_type_queries: AtomicUsize,
    pub video: Mutex<Option<VideoOutputInfo>>,
    pub audio: Option<AudioOutputInfo>,
    pub main: Arc<FakeVideoSource>,
    pub video_encoders: Mutex<Vec<Arc<FakeVideoEncoder>>>,
    pub audio_encoders: Mutex<Vec<Arc<FakeAudioEncoder>>>,
    /// Weak so tests can observe when the controller releases an output
    pub outputs: Mutex<Vec<Weak<FakeOutput>>>,
    pub services: Mutex<Vec<Value>>,
    pub groupings: Mutex<Vec<(String, String)>>,
    pub failing_output_types: Mutex<Vec<String>>,
    pub fail_video_encoders: AtomicBool,
    pub fail_service: AtomicBool,
    pub modules: Vec<LoadedModule>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        let info = VideoOutputInfo {
            base_width: 1920,
            base_height: 1080,
            output_width: 1920,
            output_height: 1080,
            fps_num: 60,
            fps_den: 1,
        };
        Self {
            encoder_types: vec!["obs_x264".to_string(), "ffmpeg_aac".to_string()],
            encoder_type_queries: AtomicUsize::new(0),
            video: Mutex::new(Some(info)),
            audio: Some(AudioOutputInfo { samples_per_sec: 48000, speakers: SpeakerLayout::Stereo }),
            main: FakeVideoSource::new("main", Some(info)),
            video_encoders: Mutex::new(Vec::new()),
            audio_encoders: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            groupings: Mutex::new(Vec::new()),
            failing_output_types: Mutex::new(Vec::new()),
            fail_video_encoders: AtomicBool::new(false),
            fail_service: AtomicBool::new(false),
            modules: Vec::new(),
        }
    }
}

impl FakeRuntime {
    pub fn video_encoder(&self, index: usize) -> Arc<FakeVideoEncoder> {
        Arc::clone(&self.video_encoders.lock().unwrap()[index])
    }

    pub fn audio_encoder(&self, index: usize) -> Arc<FakeAudioEncoder> {
        Arc::clone(&self.audio_encoders.lock().unwrap()[index])
    }

    /// Live output of the given type, most recent first
    pub fn output(&self, output_type: &str) -> Option<Arc<FakeOutput>> {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .find(|o| o.output_type == output_type)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    pub fn live_output_count(&self) -> usize {
        self.outputs.lock().unwrap().iter().filter(|o| o.strong_count() > 0).count()
    }

    pub fn grouping_count(&self) -> usize {
        self.groupings.lock().unwrap().len()
    }
}

impl MediaRuntime for FakeRuntime {
    fn encoder_types(&self) -> Vec<String> {
        self.encoder_type_queries.fetch_add(1, Ordering::SeqCst);
        self.encoder_types.clone()
    }

    fn video_info(&self) -> Option<VideoOutputInfo> {
        *self.video.lock().unwrap()
    }

    fn audio_info(&self) -> Option<AudioOutputInfo> {
        self.audio
    }

    fn main_video(&self) -> Arc<dyn VideoSource> {
        Arc::clone(&self.main) as Arc<dyn VideoSource>
    }

    fn create_video_encoder(&self, _encoder_type: &str, name: &str, settings: &Value) -> Option<Arc<dyn VideoEncoder>> {
        if self.fail_video_encoders.load(Ordering::SeqCst) {
            return None;
        }
        let encoder = Arc::new(FakeVideoEncoder::new(name, settings.clone()));
        self.video_encoders.lock().unwrap().push(Arc::clone(&encoder));
        Some(encoder)
    }

    fn create_audio_encoder(
        &self,
        _encoder_id: &str,
        name: &str,
        settings: Option<&Value>,
        mixer_idx: usize,
    ) -> Option<Arc<dyn AudioEncoder>> {
        let encoder = Arc::new(FakeAudioEncoder {
            name: name.to_string(),
            settings: settings.cloned(),
            mixer: mixer_idx,
            layout: Mutex::new(None),
        });
        self.audio_encoders.lock().unwrap().push(Arc::clone(&encoder));
        Some(encoder)
    }

    fn create_output(&self, output_type: &str, name: &str, _settings: Option<&Value>) -> Option<Arc<dyn Output>> {
        if self.failing_output_types.lock().unwrap().iter().any(|t| t == output_type) {
            return None;
        }
        let output = Arc::new(FakeOutput::new(output_type, name));
        self.outputs.lock().unwrap().push(Arc::downgrade(&output));
        Some(output)
    }

    fn create_service(&self, _service_type: &str, _name: &str, settings: &Value) -> Option<Arc<dyn Service>> {
        if self.fail_service.load(Ordering::SeqCst) {
            return None;
        }
        self.services.lock().unwrap().push(settings.clone());
        Some(Arc::new(FakeService { settings: settings.clone() }))
    }

    fn group_keyframe_aligned(&self, leader: &Arc<dyn VideoEncoder>, encoder: &Arc<dyn VideoEncoder>) {
        self.groupings.lock().unwrap().push((leader.name(), encoder.name()));
    }

    fn loaded_modules(&self) -> Vec<LoadedModule> {
        self.modules.clone()
    }
}

pub struct FakeExtraView {
    pub name: String,
    pub info: VideoOutputInfo,
    pub start_ok: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeExtraView {
    pub fn new(name: &str, info: VideoOutputInfo, start_ok: bool) -> Self {
        Self {
            name: name.to_string(),
            info,
            start_ok,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ExtraViewProvider for FakeExtraView {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Option<Arc<dyn VideoSource>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.start_ok {
            return None;
        }
        Some(FakeVideoSource::new(&self.name, Some(self.info)) as Arc<dyn VideoSource>)
    }

    fn stop(&self, _source: Arc<dyn VideoSource>) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Transport, prompt, telemetry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Replies with queued results in order; fails once the queue is empty
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn replying(body: impl Into<String>) -> Self {
        let transport = Self::default();
        transport.push_reply(Ok(body.into()));
        transport
    }

    pub fn push_reply(&self, reply: Result<String, TransportError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            body,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            timeout,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted reply".to_string())))
    }
}

/// Answers every question with a fixed reply and counts the questions.
/// The default declines everything.
pub struct ScriptedPrompt {
    pub continue_on_warning: bool,
    pub continue_on_mismatch: bool,
    pub incompatible_choice: IncompatibleSettingsChoice,
    warnings: AtomicUsize,
    mismatches: Mutex<Vec<HashMismatch>>,
    incompatible: Mutex<Vec<IncompatibleSetting>>,
}

impl Default for ScriptedPrompt {
    fn default() -> Self {
        Self {
            continue_on_warning: false,
            continue_on_mismatch: false,
            incompatible_choice: IncompatibleSettingsChoice::Cancel,
            warnings: AtomicUsize::new(0),
            mismatches: Mutex::new(Vec::new()),
            incompatible: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedPrompt {
    pub fn accepting() -> Self {
        Self {
            continue_on_warning: true,
            continue_on_mismatch: true,
            incompatible_choice: IncompatibleSettingsChoice::DisableForThisStream,
            ..Self::default()
        }
    }

    pub fn choosing(choice: IncompatibleSettingsChoice) -> Self {
        Self { incompatible_choice: choice, ..Self::default() }
    }

    pub fn warning_prompts(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn reported_mismatches(&self) -> Vec<HashMismatch> {
        self.mismatches.lock().unwrap().clone()
    }

    pub fn reported_incompatible(&self) -> Vec<IncompatibleSetting> {
        self.incompatible.lock().unwrap().clone()
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn confirm_server_warning(&self, _message: &str) -> bool {
        self.warnings.fetch_add(1, Ordering::SeqCst);
        self.continue_on_warning
    }

    fn confirm_integrity_mismatch(&self, mismatches: &[HashMismatch]) -> bool {
        self.mismatches.lock().unwrap().extend_from_slice(mismatches);
        self.continue_on_mismatch
    }

    fn resolve_incompatible_settings(
        &self,
        _service_name: &str,
        settings: &[IncompatibleSetting],
    ) -> IncompatibleSettingsChoice {
        self.incompatible.lock().unwrap().extend_from_slice(settings);
        self.incompatible_choice
    }
}

/// Keeps every telemetry body for inspection
#[derive(Default)]
pub struct RecordingDelivery {
    bodies: Mutex<Vec<String>>,
}

impl RecordingDelivery {
    /// Decoded `{"Name", "Properties"}` items in submission order
    pub fn events(&self) -> Vec<Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .filter_map(|body| decode_body(body))
            .flatten()
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e["Name"].as_str().map(str::to_string))
            .collect()
    }

    /// Properties of the last event with this name
    pub fn last(&self, name: &str) -> Option<Map<String, Value>> {
        self.events()
            .into_iter()
            .rev()
            .find(|e| e["Name"] == name)
            .and_then(|e| e["Properties"].as_object().cloned())
    }
}

impl EventDelivery for RecordingDelivery {
    fn deliver(&self, _url: &str, body: String) {
        self.bodies.lock().unwrap().push(body);
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingEventSink {
    pub fn states(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, payload)| payload["state"].as_str().map(str::to_string))
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &str, payload: Value) {
        self.events.lock().unwrap().push((event.to_string(), payload));
    }
}
