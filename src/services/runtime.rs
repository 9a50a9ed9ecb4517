// Media Runtime
// Interfaces to the encoder/output runtime and the operator-facing dialogs

use serde_json::Value;
use std::sync::Arc;

use crate::models::{AudioOutputInfo, ScaleType, SpeakerLayout, VideoOutputInfo};
use crate::services::integrity::{HashMismatch, LoadedModule};

/// Output signals the controller subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSignal {
    Start,
    Stop,
    Deactivate,
}

/// Stop code reported by an output that ended normally
pub const OUTPUT_SUCCESS: i64 = 0;

/// Parameters delivered with an output signal
#[derive(Clone)]
pub struct SignalData {
    /// The output that raised the signal
    pub output: Arc<dyn Output>,
    pub code: i64,
    pub last_error: Option<String>,
}

pub type SignalCallback = Arc<dyn Fn(&SignalData) + Send + Sync>;

/// A live signal subscription. Dropping it disconnects the callback.
pub trait SignalConnection: Send {}

/// A video feed an encoder can be bound to
pub trait VideoSource: Send + Sync {
    fn info(&self) -> Option<VideoOutputInfo>;
}

/// Encoded-frame counters sampled for telemetry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub encoded: u64,
    pub lagged: u64,
}

pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> String;
    fn set_video(&self, source: Arc<dyn VideoSource>);
    fn set_scaled_size(&self, width: u32, height: u32);
    fn set_gpu_scale_type(&self, scale_type: ScaleType);
    fn set_frame_rate_divisor(&self, divisor: u32);
    fn frame_counts(&self) -> Option<FrameCounts> {
        None
    }
}

pub trait AudioEncoder: Send + Sync {
    fn name(&self) -> String;
    fn set_speaker_layout(&self, layout: SpeakerLayout);
}

/// Network target (server + key) attached to a streaming output
pub trait Service: Send + Sync {
    fn settings(&self) -> Value;
}

pub trait Output: Send + Sync {
    fn name(&self) -> String;
    fn set_service(&self, service: Arc<dyn Service>);
    fn set_video_encoder(&self, encoder: Arc<dyn VideoEncoder>, index: usize);
    fn set_audio_encoder(&self, encoder: Arc<dyn AudioEncoder>, index: usize);
    fn enable_bpm(&self, enabled: bool);
    fn start(&self) -> bool;
    fn stop(&self);
    fn active(&self) -> bool;
    fn reconnecting(&self) -> bool;
    fn connect_time_ms(&self) -> Option<i64>;
    fn connect_signal(&self, signal: OutputSignal, callback: SignalCallback) -> Box<dyn SignalConnection>;
}

/// Factory and global state of the encoder runtime
pub trait MediaRuntime: Send + Sync {
    /// Registered encoder type ids
    fn encoder_types(&self) -> Vec<String>;
    /// Main canvas configuration
    fn video_info(&self) -> Option<VideoOutputInfo>;
    fn audio_info(&self) -> Option<AudioOutputInfo>;
    fn main_video(&self) -> Arc<dyn VideoSource>;
    fn create_video_encoder(
        &self,
        encoder_type: &str,
        name: &str,
        settings: &Value,
    ) -> Option<Arc<dyn VideoEncoder>>;
    /// Create an audio encoder fed from `mixer_idx` of the main audio
    fn create_audio_encoder(
        &self,
        encoder_id: &str,
        name: &str,
        settings: Option<&Value>,
        mixer_idx: usize,
    ) -> Option<Arc<dyn AudioEncoder>>;
    fn create_output(&self, output_type: &str, name: &str, settings: Option<&Value>) -> Option<Arc<dyn Output>>;
    fn create_service(&self, service_type: &str, name: &str, settings: &Value) -> Option<Arc<dyn Service>>;
    /// Make `encoder` emit keyframes at the same points as `leader`
    fn group_keyframe_aligned(&self, leader: &Arc<dyn VideoEncoder>, encoder: &Arc<dyn VideoEncoder>);
    fn loaded_modules(&self) -> Vec<LoadedModule> {
        Vec::new()
    }
}

/// A named auxiliary video feed that can be started for a session
pub trait ExtraViewProvider: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> Option<Arc<dyn VideoSource>>;
    fn stop(&self, source: Arc<dyn VideoSource>);
}

/// Settings that cannot be combined with a multitrack stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatibleSetting {
    StreamDelay,
    NewSocketLoop,
    DynamicBitrate,
}

impl IncompatibleSetting {
    pub fn label(self) -> &'static str {
        match self {
            IncompatibleSetting::StreamDelay => "Stream Delay",
            IncompatibleSetting::NewSocketLoop => "Enable new networking code",
            IncompatibleSetting::DynamicBitrate => "Dynamically change bitrate to manage congestion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatibleSettingsChoice {
    DisableForThisStream,
    UpdateSettings,
    Cancel,
}

impl IncompatibleSettingsChoice {
    pub fn action_text(self) -> &'static str {
        match self {
            IncompatibleSettingsChoice::DisableForThisStream => {
                "Disable for this stream and Start Streaming"
            }
            IncompatibleSettingsChoice::UpdateSettings => "Update Settings and Start Streaming",
            IncompatibleSettingsChoice::Cancel => "cancel",
        }
    }
}

/// Blocking questions put to the operator
pub trait OperatorPrompt: Send + Sync {
    /// Server returned a warning; `true` continues with the config
    fn confirm_server_warning(&self, message: &str) -> bool;
    /// Loaded modules differ from the published manifest; `true` continues
    fn confirm_integrity_mismatch(&self, mismatches: &[HashMismatch]) -> bool;
    fn resolve_incompatible_settings(
        &self,
        service_name: &str,
        settings: &[IncompatibleSetting],
    ) -> IncompatibleSettingsChoice;
}
