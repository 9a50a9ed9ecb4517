// Multitrack Video Output
// Session controller: prepares, starts, stops and tears down one multitrack stream

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::models::{Capabilities, GoLivePost, RemoteConfig, Settings};
use crate::services::go_live_client::{build_post_data, GoLiveConfigClient, PostDataParams};
use crate::services::integrity::check_plugin_hash_mismatches;
use crate::services::output_builder::{build_service_target, BuildRequest, OutputBuilder};
use crate::services::{
    censored_json, emit_event, ivs_events, AttemptClock, AudioEncoder, EventProperties, EventSink,
    EveryMinute, ExtraViewProvider, HttpTransport, Identity, IncompatibleSetting,
    IncompatibleSettingsChoice, MainThreadExecutor, MediaRuntime, MultitrackVideoError,
    OperatorPrompt, Output, OutputSignal, Service, SettingsManager, SignalConnection, SignalData,
    TelemetrySubmitter, VideoEncoder, VideoSource, OUTPUT_SUCCESS,
};

pub const STATE_EVENT: &str = "multitrack://state";

/// Everything a go-live attempt needs from the caller
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub config_url: String,
    pub stream_key: String,
    /// Overrides the config's ingest endpoint; an empty string is rejected
    pub rtmp_url: Option<String>,
    pub audio_encoder_id: String,
    pub audio_bitrate: Option<u32>,
    pub maximum_aggregate_bitrate: Option<u64>,
    pub maximum_video_tracks: Option<u32>,
    /// JSON replacing the downloaded config for encoder setup
    pub custom_config: Option<String>,
    /// Settings of the local dump output (see `output_builder::recording_settings`); `None` disables it
    pub recording: Option<Value>,
    pub vod_track_mixer: Option<usize>,
    /// Published module hash manifest to verify before going live
    pub integrity_manifest: Option<String>,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// Outputs are built and waiting to be started
    Ready,
    /// A session already exists; nothing was done
    AlreadyActive,
}

/// Collaborators of the controller
pub struct MultitrackDeps {
    pub runtime: Arc<dyn MediaRuntime>,
    pub transport: Arc<dyn HttpTransport>,
    pub prompt: Arc<dyn OperatorPrompt>,
    pub telemetry: Arc<TelemetrySubmitter>,
    pub main: Arc<dyn MainThreadExecutor>,
    pub events: Arc<dyn EventSink>,
    pub settings: Arc<SettingsManager>,
    pub identity: Identity,
    pub extra_views: Vec<Arc<dyn ExtraViewProvider>>,
}

#[derive(Serialize)]
struct StateEvent<'a> {
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

fn emit_state(events: &dyn EventSink, state: &str, error: Option<&str>) {
    emit_event(events, STATE_EVENT, &StateEvent { state, error });
}

/// Live objects of one output. Signal connections are declared first so
/// they disconnect before anything else is released.
#[allow(dead_code)]
struct OutputObjects {
    connections: Vec<Box<dyn SignalConnection>>,
    output: Arc<dyn Output>,
    video_encoders: Vec<Arc<dyn VideoEncoder>>,
    audio_encoders: Vec<Arc<dyn AudioEncoder>>,
    service: Option<Arc<dyn Service>>,
}

/// Data for the start/start-failed event sent once the caller reports the outcome
struct PendingStart {
    post: GoLivePost,
    config: RemoteConfig,
    clock: AttemptClock,
    download_ms: u64,
}

struct Inner {
    runtime: Arc<dyn MediaRuntime>,
    builder: OutputBuilder,
    client: GoLiveConfigClient,
    prompt: Arc<dyn OperatorPrompt>,
    telemetry: Arc<TelemetrySubmitter>,
    main: Arc<dyn MainThreadExecutor>,
    events: Arc<dyn EventSink>,
    settings: Arc<SettingsManager>,
    identity: Identity,
    extra_view_providers: Vec<Arc<dyn ExtraViewProvider>>,

    prepare_lock: tokio::sync::Mutex<()>,
    // lock order: current, then current_stream_dump
    current: Mutex<Option<OutputObjects>>,
    current_stream_dump: Mutex<Option<OutputObjects>>,
    started_views: Mutex<Vec<(Arc<dyn ExtraViewProvider>, Arc<dyn VideoSource>)>>,
    attempt_clock: Mutex<Option<AttemptClock>>,
    pending_start: Mutex<Option<PendingStart>>,
    sampler: Mutex<Option<EveryMinute>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Controller for a single multitrack stream at a time
#[derive(Clone)]
pub struct MultitrackVideoOutput {
    inner: Arc<Inner>,
}

impl MultitrackVideoOutput {
    pub fn new(deps: MultitrackDeps) -> Self {
        deps.telemetry.set_always_string("device_id", &deps.identity.device_id);
        deps.telemetry.set_always_string("obs_session_id", &deps.identity.session_id);

        let inner = Inner {
            builder: OutputBuilder::new(Arc::clone(&deps.runtime)),
            client: GoLiveConfigClient::new(deps.transport),
            runtime: deps.runtime,
            prompt: deps.prompt,
            telemetry: deps.telemetry,
            main: deps.main,
            events: deps.events,
            settings: deps.settings,
            identity: deps.identity,
            extra_view_providers: deps.extra_views,
            prepare_lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            current_stream_dump: Mutex::new(None),
            started_views: Mutex::new(Vec::new()),
            attempt_clock: Mutex::new(None),
            pending_start: Mutex::new(None),
            sampler: Mutex::new(None),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Download the go-live config and build every output object.
    ///
    /// Returns `AlreadyActive` without side effects while a stream or its dump
    /// is still alive. On error everything built so far is released, extra
    /// views are stopped and a start-failed event is sent.
    pub async fn prepare_streaming(&self, req: PrepareRequest) -> Result<Prepared, MultitrackVideoError> {
        let _serial = self.inner.prepare_lock.lock().await;

        if self.inner.is_active() {
            log::warn!("Tried to prepare multitrack video output while it's already active");
            return Ok(Prepared::AlreadyActive);
        }

        let leftover_sampler = lock(&self.inner.sampler).take();
        if let Some(sampler) = leftover_sampler {
            self.inner.main.post(Box::new(move || drop(sampler)));
        }

        let clock = AttemptClock::now();
        *lock(&self.inner.attempt_clock) = Some(clock.clone());
        emit_state(self.inner.events.as_ref(), "preparing", None);

        log::info!(
            "Preparing multitrack stream: device_id={} session_id={} custom_config={} config_url={} max_bitrate={:?} max_tracks={:?} custom_rtmp_url={} vod_track={:?}",
            self.inner.identity.device_id,
            self.inner.identity.session_id,
            req.custom_config.is_some(),
            req.config_url,
            req.maximum_aggregate_bitrate,
            req.maximum_video_tracks,
            req.rtmp_url.is_some(),
            req.vod_track_mixer,
        );

        let mut attempt = PrepareAttempt::new(&self.inner, clock);
        match Inner::prepare(&self.inner, &req, &mut attempt).await {
            Ok(()) => {
                attempt.succeeded();
                Ok(Prepared::Ready)
            }
            Err(e) => {
                log::warn!("Failed to prepare multitrack stream: {e}");
                attempt.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Report whether the prepared output started
    pub fn started_streaming(&self, success: bool) {
        let inner = &self.inner;
        let pending = lock(&inner.pending_start).take();

        if !success {
            if let Some(pending) = pending {
                inner
                    .telemetry
                    .set_always_string("stream_attempt_start_time", &pending.clock.iso_string());
                let event = ivs_events::stream_start_failed(
                    Some(&pending.post),
                    Some(&pending.config),
                    &pending.clock,
                    Some(pending.download_ms),
                    pending.clock.elapsed_ms(),
                    None,
                );
                inner.telemetry.submit(ivs_events::STREAM_START_FAILED, event);
            }
            emit_state(inner.events.as_ref(), "failed", Some("output failed to start"));
            return;
        }

        if let Some(dump) = inner.dump_output() {
            let started = dump.start();
            log::info!("Starting multitrack recording{}", if started { "" } else { " failed" });
        }

        if let Some(pending) = pending {
            inner
                .telemetry
                .set_always_string("stream_attempt_start_time", &pending.clock.iso_string());
            let event = ivs_events::stream_start(
                &pending.post,
                &pending.config,
                &pending.clock,
                pending.download_ms,
                pending.clock.elapsed_ms(),
                self.connect_time_ms(),
            );
            inner.telemetry.submit(ivs_events::STREAM_START, event);
        }

        let encoders: Option<Vec<Weak<dyn VideoEncoder>>> = lock(&inner.current)
            .as_ref()
            .map(|objects| objects.video_encoders.iter().map(Arc::downgrade).collect());
        if let Some(encoders) = encoders {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let sampler = EveryMinute::start(&handle, Arc::clone(&inner.telemetry), encoders);
                    *lock(&inner.sampler) = Some(sampler);
                }
                Err(_) => log::warn!("No async runtime available, per-minute stream stats disabled"),
            }
        }

        emit_state(inner.events.as_ref(), "active", None);
    }

    /// Ask the stream (and its dump) to stop. Teardown follows from the stop signal.
    pub fn stop_streaming(&self) {
        if let Some(output) = self.inner.stream_output() {
            output.stop();
            self.inner
                .telemetry
                .submit(ivs_events::STREAM_STOP, ivs_events::stream_stop(None));
        }

        if let Some(dump) = self.inner.dump_output() {
            dump.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// The prepared network output, for the caller to start
    pub fn streaming_output(&self) -> Option<Arc<dyn Output>> {
        self.inner.stream_output()
    }

    pub fn connect_time_ms(&self) -> Option<i64> {
        self.inner.stream_output().and_then(|output| output.connect_time_ms())
    }

    /// Resolve output options that cannot be combined with multitrack video.
    ///
    /// Returns `false` when the operator cancels. Flags are cleared in
    /// `settings` for this stream; choosing to update settings also persists it.
    pub fn handle_incompatible_settings(&self, settings: &mut Settings) -> bool {
        let mut incompatible = Vec::new();
        if settings.delay_enable {
            incompatible.push(IncompatibleSetting::StreamDelay);
        }
        if settings.new_socket_loop_enable {
            incompatible.push(IncompatibleSetting::NewSocketLoop);
        }
        if settings.dynamic_bitrate {
            incompatible.push(IncompatibleSetting::DynamicBitrate);
        }
        if incompatible.is_empty() {
            return true;
        }

        let choice = self
            .inner
            .prompt
            .resolve_incompatible_settings(&settings.multitrack_video_name, &incompatible);

        let names: Vec<&str> = incompatible.iter().map(|s| s.label()).collect();
        let error = format!(
            "attempted to start stream with incompatible settings ({}); action taken: {}",
            names.join(", "),
            choice.action_text()
        );
        log::info!("{error}");
        self.inner
            .telemetry
            .submit(ivs_events::STREAM_STOP, ivs_events::stream_stop(Some(&error)));

        if choice == IncompatibleSettingsChoice::Cancel {
            return false;
        }

        settings.delay_enable = false;
        settings.new_socket_loop_enable = false;
        settings.dynamic_bitrate = false;

        if choice == IncompatibleSettingsChoice::UpdateSettings {
            if let Err(e) = self.inner.settings.disable_incompatible_output_settings() {
                log::error!("Failed to save output settings: {e}");
            }
        }
        true
    }
}

impl Inner {
    async fn prepare(
        self: &Arc<Self>,
        req: &PrepareRequest,
        attempt: &mut PrepareAttempt<'_>,
    ) -> Result<(), MultitrackVideoError> {
        let views = self.start_extra_views();

        if let Some(manifest) = &req.integrity_manifest {
            self.check_integrity(manifest)?;
        }

        let extra_views = views
            .iter()
            .filter_map(|(name, source)| source.info().map(|info| (name.clone(), info)))
            .collect();
        let post = build_post_data(PostDataParams {
            attempt_start_time: attempt.clock.iso_string(),
            stream_key: &req.stream_key,
            maximum_aggregate_bitrate: req.maximum_aggregate_bitrate,
            maximum_video_tracks: req.maximum_video_tracks,
            vod_track_enabled: req.vod_track_mixer.is_some(),
            video_info: self.runtime.video_info(),
            extra_views,
            capabilities: req.capabilities.clone(),
        });
        attempt.post = Some(post.clone());

        let downloaded = self
            .client
            .fetch(&req.config_url, &post, self.prompt.as_ref())
            .await?;
        let download_ms = attempt.clock.elapsed_ms();
        attempt.download_ms = Some(download_ms);
        attempt.config = Some(downloaded.clone());

        let config = match &req.custom_config {
            Some(text) => {
                let custom = custom_config_with_id(text, &downloaded)?;
                attempt.config = Some(custom.clone());
                custom
            }
            None => downloaded.clone(),
        };

        if let Some(config_id) = config.config_id() {
            log::info!("Multitrack config_id: '{config_id}'");
            self.telemetry.set_always_string("config_id", config_id);
        }
        self.telemetry.set_always_bool("config_custom", req.custom_config.is_some());

        let built = match self.builder.build(&BuildRequest {
            config: &config,
            extra_views: &views,
            audio_encoder_id: &req.audio_encoder_id,
            audio_bitrate: req.audio_bitrate,
            vod_track_mixer: req.vod_track_mixer,
            recording_settings: req.recording.clone(),
        }) {
            Ok(built) => built,
            Err(failure) => {
                if let Some(partial) = failure.partial {
                    self.main.post(Box::new(move || drop(partial)));
                }
                return Err(failure.error);
            }
        };

        let service = match build_service_target(
            &downloaded.ingest_endpoints(),
            req.rtmp_url.as_deref(),
            &req.stream_key,
            &self.identity,
            config.config_id(),
        )
        .and_then(|target| self.builder.create_service(&target))
        {
            Ok(service) => service,
            Err(e) => {
                self.main.post(Box::new(move || drop(built)));
                return Err(e);
            }
        };
        built.output.set_service(Arc::clone(&service));
        built.output.enable_bpm(true);

        if let Some(recording) = built.recording_output {
            let connections = self.connect_signals(&recording, true);
            *lock(&self.current_stream_dump) = Some(OutputObjects {
                connections,
                output: recording,
                video_encoders: built.video_encoders.clone(),
                audio_encoders: built.audio_encoders.clone(),
                service: None,
            });
        }

        let connections = self.connect_signals(&built.output, false);
        *lock(&self.current) = Some(OutputObjects {
            connections,
            output: built.output,
            video_encoders: built.video_encoders,
            audio_encoders: built.audio_encoders,
            service: Some(service),
        });

        *lock(&self.pending_start) = Some(PendingStart {
            post,
            config,
            clock: attempt.clock.clone(),
            download_ms,
        });
        Ok(())
    }

    fn check_integrity(&self, manifest: &str) -> Result<(), MultitrackVideoError> {
        let modules = self.runtime.loaded_modules();
        let Some(mismatches) = check_plugin_hash_mismatches(manifest, &modules) else {
            return Ok(());
        };
        if mismatches.is_empty() {
            return Ok(());
        }
        for mismatch in &mismatches {
            log::warn!(
                "Module hash mismatch for {}: {} (expected {})",
                mismatch.file_name,
                mismatch.current_hash,
                mismatch.expected_hash
            );
        }
        if self.prompt.confirm_integrity_mismatch(&mismatches) {
            Ok(())
        } else {
            Err(MultitrackVideoError::Cancelled)
        }
    }

    fn connect_signals(self: &Arc<Self>, output: &Arc<dyn Output>, recording: bool) -> Vec<Box<dyn SignalConnection>> {
        let handlers: [(OutputSignal, fn(&Inner, &SignalData)); 3] = if recording {
            [
                (OutputSignal::Start, Inner::on_recording_start),
                (OutputSignal::Stop, Inner::on_recording_stop),
                (OutputSignal::Deactivate, Inner::on_recording_deactivate),
            ]
        } else {
            [
                (OutputSignal::Start, Inner::on_stream_start),
                (OutputSignal::Stop, Inner::on_stream_stop),
                (OutputSignal::Deactivate, Inner::on_stream_deactivate),
            ]
        };

        handlers
            .into_iter()
            .map(|(signal, handler)| {
                let weak = Arc::downgrade(self);
                output.connect_signal(
                    signal,
                    Arc::new(move |data: &SignalData| {
                        if let Some(inner) = weak.upgrade() {
                            handler(&inner, data);
                        }
                    }),
                )
            })
            .collect()
    }

    fn is_active(&self) -> bool {
        let current = lock(&self.current);
        let dump = lock(&self.current_stream_dump);
        current.is_some() || dump.is_some()
    }

    fn stream_output(&self) -> Option<Arc<dyn Output>> {
        lock(&self.current).as_ref().map(|objects| Arc::clone(&objects.output))
    }

    fn dump_output(&self) -> Option<Arc<dyn Output>> {
        lock(&self.current_stream_dump)
            .as_ref()
            .map(|objects| Arc::clone(&objects.output))
    }

    fn take_current(&self) -> Option<OutputObjects> {
        lock(&self.current).take()
    }

    fn take_current_stream_dump(&self) -> Option<OutputObjects> {
        lock(&self.current_stream_dump).take()
    }

    fn release_on_main(&self, objects: Option<OutputObjects>) {
        if let Some(objects) = objects {
            self.main.post(Box::new(move || drop(objects)));
        }
    }

    fn start_extra_views(&self) -> Vec<(String, Arc<dyn VideoSource>)> {
        let mut started = lock(&self.started_views);
        let mut views = Vec::new();
        for provider in &self.extra_view_providers {
            let Some(source) = provider.start() else {
                log::warn!("Extra view '{}' failed to start", provider.name());
                continue;
            };
            views.push((provider.name().to_string(), Arc::clone(&source)));
            started.push((Arc::clone(provider), source));
        }
        views
    }

    fn stop_extra_views(&self) {
        let views = std::mem::take(&mut *lock(&self.started_views));
        for (provider, source) in views {
            provider.stop(source);
        }
    }

    fn on_stream_start(&self, _data: &SignalData) {
        let Some(clock) = lock(&self.attempt_clock).clone() else {
            return;
        };
        self.telemetry
            .submit(ivs_events::STREAM_STARTED, ivs_events::stream_started(clock.elapsed_ms()));
    }

    fn on_stream_stop(&self, data: &SignalData) {
        self.stop_extra_views();

        if !data.output.reconnecting() {
            if let Some(dump) = self.dump_output() {
                dump.stop();
            }
        }

        let code = (data.code != OUTPUT_SUCCESS).then_some(data.code);
        let stopped = ivs_events::stream_stopped(code, data.last_error.as_deref());

        if data.output.active() {
            return;
        }
        self.teardown_current(Some(stopped));
    }

    fn on_stream_deactivate(&self, data: &SignalData) {
        if data.output.reconnecting() {
            return;
        }
        self.teardown_current(None);
    }

    /// Release the stream session, its sampler and the sticky properties on
    /// the main context. If another signal already took the session only the
    /// stopped event is sent.
    fn teardown_current(&self, stopped: Option<EventProperties>) {
        let objects = self.take_current();
        if objects.is_none() {
            if let Some(stopped) = stopped {
                self.telemetry.submit(ivs_events::STREAM_STOPPED, stopped);
            }
            return;
        }

        let sampler = lock(&self.sampler).take();
        let telemetry = Arc::clone(&self.telemetry);
        let events = Arc::clone(&self.events);
        self.main.post(Box::new(move || {
            if let Some(stopped) = stopped {
                telemetry.submit(ivs_events::STREAM_STOPPED, stopped);
            }
            telemetry.unset_always("config_id");
            telemetry.unset_always("stream_attempt_start_time");
            drop(sampler);
            drop(objects);
            emit_state(events.as_ref(), "stopped", None);
        }));
    }

    fn on_recording_start(&self, _data: &SignalData) {
        log::info!("Multitrack recording started");
    }

    fn on_recording_stop(&self, data: &SignalData) {
        log::info!("Multitrack recording stopped");
        if data.output.active() {
            return;
        }
        self.release_on_main(self.take_current_stream_dump());
    }

    fn on_recording_deactivate(&self, _data: &SignalData) {
        if lock(&self.current_stream_dump).is_none() {
            return;
        }
        self.release_on_main(self.take_current_stream_dump());
    }
}

/// Parse the caller's override config and give it the downloaded config_id
/// (or a fresh one) so telemetry stays correlated.
fn custom_config_with_id(text: &str, downloaded: &RemoteConfig) -> Result<RemoteConfig, MultitrackVideoError> {
    let mut custom = RemoteConfig::parse(text).map_err(|e| {
        log::error!("Invalid custom go-live config: {e}");
        MultitrackVideoError::InvalidCustomConfig(e)
    })?;

    let config_id = match downloaded.config_id() {
        Some(id) => {
            log::info!("Using config_id from go-live config with custom config: {id}");
            id.to_string()
        }
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            log::info!("Failed to copy config_id from go-live config, using: {generated}");
            generated
        }
    };
    custom.set_config_id(&config_id);

    log::info!("Using custom go-live config: {}", censored_json(&custom.to_value()));
    Ok(custom)
}

/// Unwinds a preparation attempt unless it succeeded. Runs on early return,
/// error, or when the prepare future is dropped.
struct PrepareAttempt<'a> {
    inner: &'a Inner,
    clock: AttemptClock,
    post: Option<GoLivePost>,
    config: Option<RemoteConfig>,
    download_ms: Option<u64>,
    error: Option<String>,
    armed: bool,
}

impl<'a> PrepareAttempt<'a> {
    fn new(inner: &'a Inner, clock: AttemptClock) -> Self {
        Self { inner, clock, post: None, config: None, download_ms: None, error: None, armed: true }
    }

    fn succeeded(mut self) {
        self.armed = false;
    }
}

impl Drop for PrepareAttempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let event = ivs_events::stream_start_failed(
            self.post.as_ref(),
            self.config.as_ref(),
            &self.clock,
            self.download_ms,
            self.clock.elapsed_ms(),
            self.error.as_deref(),
        );
        self.inner.telemetry.submit(ivs_events::STREAM_START_FAILED, event);
        self.inner.telemetry.unset_always("config_id");
        self.inner.telemetry.unset_always("stream_attempt_start_time");

        self.inner.stop_extra_views();
        emit_state(self.inner.events.as_ref(), "failed", self.error.as_deref());
    }
}
