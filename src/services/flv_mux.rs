// FLV Muxer
// Frames encoded packets and stream metadata as FLV tags

use bytes::{BufMut, Bytes, BytesMut};

use crate::models::{EncoderPacket, PacketKind};
use crate::services::amf::{self, put_key, put_u24};

pub const TAG_TYPE_AUDIO: u8 = 8;
pub const TAG_TYPE_VIDEO: u8 = 9;
pub const TAG_TYPE_INFO: u8 = 18;

pub const TAG_HEADER_SIZE: usize = 11;
pub const FILE_HEADER_SIZE: usize = 13;
pub const VIDEO_PREFIX_SIZE: usize = 5;
pub const AUDIO_PREFIX_SIZE: usize = 2;

const VIDEODATA_AVCVIDEOPACKET: f64 = 7.0;
const AUDIODATA_AAC: f64 = 10.0;
const AAC_SOUND_FORMAT: u8 = 0xAF;
const METADATA_ENTRY_COUNT: u32 = 20;

/// Offset of the `duration` entry in a metadata block written with a file header.
///
/// File header, tag header, "@setDataFrame" and "onMetaData" strings, then the
/// ECMA array marker and its count precede it.
pub const FILE_INFO_OFFSET: u64 =
    (FILE_HEADER_SIZE + TAG_HEADER_SIZE + (3 + 13) + (3 + 10) + 5) as u64;

/// Values written into the `onMetaData` object
#[derive(Debug, Clone, PartialEq)]
pub struct FlvMetadata {
    pub width: u32,
    pub height: u32,
    pub video_bitrate: f64,
    pub frame_rate: f64,
    pub audio_bitrate: f64,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub encoder_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaLabelValue {
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaLabel {
    pub property: String,
    pub value: MediaLabelValue,
}

impl MediaLabel {
    pub fn number(property: &str, value: f64) -> Self {
        Self { property: property.to_string(), value: MediaLabelValue::Number(value) }
    }

    pub fn string(property: &str, value: &str) -> Self {
        Self {
            property: property.to_string(),
            value: MediaLabelValue::String(value.to_string()),
        }
    }
}

/// An auxiliary sub-stream carried in `additionalMedia` info tags
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalMedia {
    pub stream_name: String,
    pub kind: PacketKind,
    pub labels: Vec<MediaLabel>,
}

/// Contents of the `onExpectAdditionalMedia` announcement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdditionalMetadata {
    pub processing_intents: Vec<String>,
    pub additional_media: Vec<AdditionalMedia>,
    pub default_audio_labels: Vec<MediaLabel>,
    pub default_video_labels: Vec<MediaLabel>,
}

fn packet_time_ms(packet: &EncoderPacket, dts_offset_ms: i32) -> i32 {
    (packet.dts_ms() as i32).wrapping_sub(dts_offset_ms)
}

fn composition_offset_ms(packet: &EncoderPacket) -> u32 {
    packet.ticks_to_ms(packet.pts - packet.dts) as i32 as u32
}

fn put_tag_header(buf: &mut BytesMut, tag_type: u8, payload_size: usize, time_ms: i32) {
    buf.put_u8(tag_type);
    put_u24(buf, payload_size as u32);
    put_u24(buf, time_ms as u32);
    buf.put_u8(((time_ms >> 24) & 0x7F) as u8);
    put_u24(buf, 0);
}

/// Trailer: size of the tag just written, header included
fn put_previous_tag_size(buf: &mut BytesMut, tag_start: usize) {
    let size = buf.len() - tag_start;
    buf.put_u32(size as u32);
}

fn put_video_prefix(buf: &mut BytesMut, packet: &EncoderPacket, is_header: bool) {
    buf.put_u8(if packet.keyframe { 0x17 } else { 0x27 });
    buf.put_u8(if is_header { 0 } else { 1 });
    put_u24(buf, composition_offset_ms(packet));
}

fn put_audio_prefix(buf: &mut BytesMut, is_header: bool) {
    buf.put_u8(AAC_SOUND_FORMAT);
    buf.put_u8(if is_header { 0 } else { 1 });
}

/// Mux one packet as an audio or video tag. Empty packets produce no bytes.
pub fn mux_packet(packet: &EncoderPacket, dts_offset_ms: i32, is_header: bool) -> Bytes {
    if packet.data.is_empty() {
        return Bytes::new();
    }

    let time_ms = packet_time_ms(packet, dts_offset_ms);
    let (tag_type, prefix) = match packet.kind {
        PacketKind::Video => (TAG_TYPE_VIDEO, VIDEO_PREFIX_SIZE),
        PacketKind::Audio => (TAG_TYPE_AUDIO, AUDIO_PREFIX_SIZE),
    };
    let payload_size = packet.data.len() + prefix;

    let mut buf = BytesMut::with_capacity(TAG_HEADER_SIZE + payload_size + 4);
    put_tag_header(&mut buf, tag_type, payload_size, time_ms);
    match packet.kind {
        PacketKind::Video => put_video_prefix(&mut buf, packet, is_header),
        PacketKind::Audio => put_audio_prefix(&mut buf, is_header),
    }
    buf.put_slice(&packet.data);
    put_previous_tag_size(&mut buf, 0);
    buf.freeze()
}

fn build_metadata_body(meta: &FlvMetadata) -> BytesMut {
    let mut buf = BytesMut::with_capacity(512);
    amf::put_string(&mut buf, "@setDataFrame");
    amf::put_string(&mut buf, "onMetaData");

    buf.put_u8(amf::AMF_ECMA_ARRAY);
    buf.put_u32(METADATA_ENTRY_COUNT);

    amf::put_number_entry(&mut buf, "duration", 0.0);
    amf::put_number_entry(&mut buf, "fileSize", 0.0);
    amf::put_number_entry(&mut buf, "width", meta.width as f64);
    amf::put_number_entry(&mut buf, "height", meta.height as f64);
    amf::put_number_entry(&mut buf, "videocodecid", VIDEODATA_AVCVIDEOPACKET);
    amf::put_number_entry(&mut buf, "videodatarate", meta.video_bitrate);
    amf::put_number_entry(&mut buf, "framerate", meta.frame_rate);
    amf::put_number_entry(&mut buf, "audiocodecid", AUDIODATA_AAC);
    amf::put_number_entry(&mut buf, "audiodatarate", meta.audio_bitrate);
    amf::put_number_entry(&mut buf, "audiosamplerate", meta.audio_sample_rate as f64);
    amf::put_number_entry(&mut buf, "audiosamplesize", 16.0);
    amf::put_number_entry(&mut buf, "audiochannels", meta.audio_channels as f64);

    let channels = meta.audio_channels;
    amf::put_bool_entry(&mut buf, "stereo", channels == 2);
    amf::put_bool_entry(&mut buf, "2.1", channels == 3);
    amf::put_bool_entry(&mut buf, "3.1", channels == 4);
    amf::put_bool_entry(&mut buf, "4.0", channels == 4);
    amf::put_bool_entry(&mut buf, "4.1", channels == 5);
    amf::put_bool_entry(&mut buf, "5.1", channels == 6);
    amf::put_bool_entry(&mut buf, "7.1", channels == 8);

    amf::put_string_entry(&mut buf, "encoder", &meta.encoder_name);
    amf::put_object_end(&mut buf);
    buf
}

/// Mux the `onMetaData` info tag, optionally preceded by the 13-byte file header
pub fn mux_metadata(meta: &FlvMetadata, write_file_header: bool) -> Bytes {
    let body = build_metadata_body(meta);
    let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE + TAG_HEADER_SIZE + body.len() + 4);

    if write_file_header {
        buf.put_slice(b"FLV");
        buf.put_u8(1);
        buf.put_u8(5);
        buf.put_u32(9);
        buf.put_u32(0);
    }

    let tag_start = buf.len();
    put_tag_header(&mut buf, TAG_TYPE_INFO, body.len(), 0);
    buf.put_slice(&body);
    put_previous_tag_size(&mut buf, tag_start);
    buf.freeze()
}

/// Bytes to write at [`FILE_INFO_OFFSET`] once the final duration and size are known
pub fn file_info_patch(duration_ms: i64, size: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    amf::put_number_entry(&mut buf, "duration", duration_ms as f64 / 1000.0);
    amf::put_number_entry(&mut buf, "fileSize", size as f64);
    buf.freeze()
}

fn put_media_labels(buf: &mut BytesMut, labels: &[MediaLabel]) {
    put_key(buf, "mediaLabels");
    buf.put_u8(amf::AMF_OBJECT);
    for label in labels {
        put_key(buf, &label.property);
        match &label.value {
            MediaLabelValue::Number(value) => amf::put_number(buf, *value),
            MediaLabelValue::String(value) => amf::put_string(buf, value),
        }
    }
    amf::put_object_end(buf);
}

fn put_additional_media_item(buf: &mut BytesMut, media: &AdditionalMedia) {
    put_key(buf, &media.stream_name);
    buf.put_u8(amf::AMF_OBJECT);
    let tag_type = match media.kind {
        PacketKind::Audio => TAG_TYPE_AUDIO,
        PacketKind::Video => TAG_TYPE_VIDEO,
    };
    amf::put_number_entry(buf, "type", tag_type as f64);
    put_media_labels(buf, &media.labels);
    amf::put_object_end(buf);
}

fn put_default_media_item(buf: &mut BytesMut, kind: &str, labels: &[MediaLabel]) {
    put_key(buf, kind);
    buf.put_u8(amf::AMF_OBJECT);
    put_media_labels(buf, labels);
    amf::put_object_end(buf);
}

fn build_additional_metadata_body(meta: &AdditionalMetadata) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    amf::put_string(&mut buf, "@setDataFrame");
    amf::put_string(&mut buf, "onExpectAdditionalMedia");

    buf.put_u8(amf::AMF_OBJECT);

    put_key(&mut buf, "processingIntents");
    buf.put_u8(amf::AMF_STRICT_ARRAY);
    buf.put_u32(meta.processing_intents.len() as u32);
    for intent in &meta.processing_intents {
        amf::put_string(&mut buf, intent);
    }

    // audio sub-streams are announced before video ones
    put_key(&mut buf, "additionalMedia");
    buf.put_u8(amf::AMF_OBJECT);
    for kind in [PacketKind::Audio, PacketKind::Video] {
        for media in meta.additional_media.iter().filter(|m| m.kind == kind) {
            put_additional_media_item(&mut buf, media);
        }
    }
    amf::put_object_end(&mut buf);

    put_key(&mut buf, "defaultMedia");
    buf.put_u8(amf::AMF_OBJECT);
    if !meta.default_audio_labels.is_empty() {
        put_default_media_item(&mut buf, "audio", &meta.default_audio_labels);
    }
    if !meta.default_video_labels.is_empty() {
        put_default_media_item(&mut buf, "video", &meta.default_video_labels);
    }
    amf::put_object_end(&mut buf);

    amf::put_object_end(&mut buf);
    buf
}

/// Mux the `onExpectAdditionalMedia` info tag announcing auxiliary sub-streams
pub fn mux_additional_metadata(meta: &AdditionalMetadata) -> Bytes {
    let body = build_additional_metadata_body(meta);
    let mut buf = BytesMut::with_capacity(TAG_HEADER_SIZE + body.len() + 4);
    put_tag_header(&mut buf, TAG_TYPE_INFO, body.len(), 0);
    buf.put_slice(&body);
    put_previous_tag_size(&mut buf, 0);
    buf.freeze()
}

fn build_additional_packet_body(packet: &EncoderPacket, is_header: bool, stream_id: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(packet.data.len() + 64);
    amf::put_string(&mut buf, "additionalMedia");

    buf.put_u8(amf::AMF_OBJECT);
    amf::put_string_entry(&mut buf, "id", stream_id);

    put_key(&mut buf, "media");
    buf.put_u8(amf::AMF_AVMPLUS);
    buf.put_u8(amf::AMF3_BYTE_ARRAY);
    match packet.kind {
        PacketKind::Audio => {
            amf::put_u29b_value(&mut buf, (packet.data.len() + AUDIO_PREFIX_SIZE) as u32);
            put_audio_prefix(&mut buf, is_header);
        }
        PacketKind::Video => {
            amf::put_u29b_value(&mut buf, (packet.data.len() + VIDEO_PREFIX_SIZE) as u32);
            put_video_prefix(&mut buf, packet, is_header);
        }
    }
    buf.put_slice(&packet.data);
    amf::put_object_end(&mut buf);
    buf
}

/// Mux a packet of an auxiliary sub-stream as an `additionalMedia` info tag
pub fn mux_additional_packet(
    packet: &EncoderPacket,
    dts_offset_ms: i32,
    is_header: bool,
    stream_id: &str,
) -> Bytes {
    if packet.data.is_empty() {
        return Bytes::new();
    }

    let time_ms = packet_time_ms(packet, dts_offset_ms);
    let body = build_additional_packet_body(packet, is_header, stream_id);
    let mut buf = BytesMut::with_capacity(TAG_HEADER_SIZE + body.len() + 4);
    put_tag_header(&mut buf, TAG_TYPE_INFO, body.len(), time_ms);
    buf.put_slice(&body);
    put_previous_tag_size(&mut buf, 0);
    buf.freeze()
}
