use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::RequestError;

/// Target container formats accepted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
    Webm,
    Mov,
    #[serde(rename = "mpegts")]
    MpegTs,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
            Container::Mov => "mov",
            Container::MpegTs => "mpegts",
        }
    }

    /// File extension used for output artifacts in this container.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Container::MpegTs => "ts",
            other => other.as_str(),
        }
    }

    /// Muxer name passed to the codec tool's `-f` flag.
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Mkv => "matroska",
            Container::MpegTs => "mpegts",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Av1,
    Vp9,
    Copy,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Av1 => "av1",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Copy => "copy",
        }
    }

    /// Software encoder name for the codec tool.
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
            VideoCodec::Av1 => "libsvtav1",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Copy => "copy",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target audio codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Mp3,
    Flac,
    Copy,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "opus",
            AudioCodec::Mp3 => "mp3",
            AudioCodec::Flac => "flac",
            AudioCodec::Copy => "copy",
        }
    }

    pub fn encoder(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Flac => "flac",
            AudioCodec::Copy => "copy",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speed/quality trade-off presets, ordered fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable transcode request as submitted by a caller.
///
/// The caller has already decided that this media should be transcoded (not
/// direct-played) and supplies all codec parameters; the orchestrator only
/// validates internal consistency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Stable identifier of the source media in the caller's catalogue.
    pub media_id: String,
    /// Path or URI of the input as resolvable by the codec tool.
    pub input_path: PathBuf,
    pub container: Container,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Integer rate factor (CRF-style; lower is better quality).
    pub quality: i32,
    pub preset: Preset,
    /// Optional resolution cap expressed as a maximum output height.
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Optional video bitrate cap in kbit/s.
    #[serde(default)]
    pub max_bitrate_kbps: Option<u32>,
    /// Optional start offset into the input, in seconds.
    #[serde(default)]
    pub start_offset_seconds: Option<f64>,
    /// Bounded map of extra encoder flags passed through verbatim.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl TranscodeRequest {
    /// Checks the request for internal consistency. A request that fails
    /// here is rejected before any session record is created.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.media_id.trim().is_empty() {
            return Err(RequestError::EmptyMediaId);
        }
        if self.input_path.as_os_str().is_empty() {
            return Err(RequestError::EmptyInputPath);
        }
        if !container_supports_video(self.container, self.video_codec) {
            return Err(RequestError::IncompatibleVideoCodec(
                self.video_codec,
                self.container,
            ));
        }
        if !container_supports_audio(self.container, self.audio_codec) {
            return Err(RequestError::IncompatibleAudioCodec(
                self.audio_codec,
                self.container,
            ));
        }
        if !(0..=63).contains(&self.quality) {
            return Err(RequestError::QualityOutOfRange(self.quality));
        }
        if let Some(offset) = self.start_offset_seconds {
            if offset < 0.0 {
                return Err(RequestError::NegativeStartOffset(offset));
            }
        }
        Ok(())
    }
}

/// Whether `codec` may be muxed into `container`.
///
/// WebM is the only restrictive container in the accepted set; the others
/// take everything this orchestrator can produce. `copy` is always allowed
/// since the caller vouches for the source stream.
pub fn container_supports_video(container: Container, codec: VideoCodec) -> bool {
    if codec == VideoCodec::Copy {
        return true;
    }
    match container {
        Container::Webm => matches!(codec, VideoCodec::Vp9 | VideoCodec::Av1),
        Container::Mp4 | Container::Mov => {
            matches!(codec, VideoCodec::H264 | VideoCodec::Hevc | VideoCodec::Av1)
        }
        Container::Mkv => true,
        Container::MpegTs => matches!(codec, VideoCodec::H264 | VideoCodec::Hevc),
    }
}

pub fn container_supports_audio(container: Container, codec: AudioCodec) -> bool {
    if codec == AudioCodec::Copy {
        return true;
    }
    match container {
        Container::Webm => matches!(codec, AudioCodec::Opus),
        Container::Mp4 | Container::Mov => {
            matches!(codec, AudioCodec::Aac | AudioCodec::Mp3 | AudioCodec::Flac)
        }
        Container::Mkv => true,
        Container::MpegTs => matches!(codec, AudioCodec::Aac | AudioCodec::Mp3),
    }
}

/// Metadata returned by the media metadata collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Input duration in seconds, when the source declares one.
    pub duration_seconds: Option<f64>,
    /// Input size in bytes, when the input is a local file.
    pub size_bytes: Option<u64>,
}
