// Media Model
// Video/audio runtime descriptors shared by the output builder and the muxer

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A rational frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    #[serde(rename = "numerator")]
    pub num: u32,
    #[serde(rename = "denominator")]
    pub den: u32,
}

impl Fraction {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a JSON frame rate into a fraction.
    ///
    /// Accepts `{"numerator": n, "denominator": d}`, a bare integer, or a float
    /// (stored with millisecond precision).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if let Some(obj) = value.as_object() {
            let num = obj.get("numerator").and_then(|v| v.as_u64())?;
            let den = obj.get("denominator").and_then(|v| v.as_u64())?;
            if den == 0 {
                return None;
            }
            return Some(Self::new(num as u32, den as u32));
        }
        if let Some(int) = value.as_u64() {
            return Some(Self::new(int as u32, 1));
        }
        let float = value.as_f64()?;
        if !float.is_finite() || float <= 0.0 {
            return None;
        }
        Some(Self::new((float * 1000.0).round() as u32, 1000))
    }
}

/// Geometry and timing of a video feed (main canvas or extra view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOutputInfo {
    pub base_width: u32,
    pub base_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
}

impl VideoOutputInfo {
    pub fn frame_rate(&self) -> Fraction {
        Fraction::new(self.fps_num, self.fps_den)
    }
}

/// Speaker layouts known to the audio runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeakerLayout {
    #[default]
    Unknown,
    Mono,
    Stereo,
    #[serde(rename = "2.1")]
    TwoPointOne,
    #[serde(rename = "4.0")]
    FourPointZero,
    #[serde(rename = "4.1")]
    FourPointOne,
    #[serde(rename = "5.1")]
    FivePointOne,
    #[serde(rename = "7.1")]
    SevenPointOne,
}

impl SpeakerLayout {
    pub const ALL: [SpeakerLayout; 8] = [
        SpeakerLayout::Unknown,
        SpeakerLayout::Mono,
        SpeakerLayout::Stereo,
        SpeakerLayout::TwoPointOne,
        SpeakerLayout::FourPointZero,
        SpeakerLayout::FourPointOne,
        SpeakerLayout::FivePointOne,
        SpeakerLayout::SevenPointOne,
    ];

    pub fn channels(self) -> u32 {
        match self {
            SpeakerLayout::Unknown => 0,
            SpeakerLayout::Mono => 1,
            SpeakerLayout::Stereo => 2,
            SpeakerLayout::TwoPointOne => 3,
            SpeakerLayout::FourPointZero => 4,
            SpeakerLayout::FourPointOne => 5,
            SpeakerLayout::FivePointOne => 6,
            SpeakerLayout::SevenPointOne => 8,
        }
    }

    /// First layout carrying exactly `channels` channels
    pub fn from_channels(channels: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|layout| *layout != SpeakerLayout::Unknown && layout.channels() == channels)
    }
}

/// Audio device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputInfo {
    pub samples_per_sec: u32,
    pub speakers: SpeakerLayout,
}

/// GPU scaling algorithm requested for a rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    Point,
    #[default]
    Bicubic,
    Bilinear,
    Lanczos,
    Area,
}

impl ScaleType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ScaleType::Point),
            2 => Some(ScaleType::Bicubic),
            3 => Some(ScaleType::Bilinear),
            4 => Some(ScaleType::Lanczos),
            5 => Some(ScaleType::Area),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "OBS_SCALE_POINT" => Some(ScaleType::Point),
            "OBS_SCALE_BICUBIC" => Some(ScaleType::Bicubic),
            "OBS_SCALE_BILINEAR" => Some(ScaleType::Bilinear),
            "OBS_SCALE_LANCZOS" => Some(ScaleType::Lanczos),
            "OBS_SCALE_AREA" => Some(ScaleType::Area),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Video,
    Audio,
}

/// One encoded packet handed to a container writer
#[derive(Debug, Clone)]
pub struct EncoderPacket {
    pub kind: PacketKind,
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub timebase_num: i64,
    pub timebase_den: i64,
    pub keyframe: bool,
    pub track_idx: usize,
}

impl EncoderPacket {
    /// Convert a value in packet ticks to milliseconds
    pub fn ticks_to_ms(&self, ticks: i64) -> i64 {
        if self.timebase_den == 0 {
            return 0;
        }
        ticks * 1000 * self.timebase_num / self.timebase_den
    }

    pub fn dts_ms(&self) -> i64 {
        self.ticks_to_ms(self.dts)
    }
}
