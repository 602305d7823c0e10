//! Probed media model and media-source enums.
//!
//! [`MediaInfo`] is the stream-level view of a file that the argument
//! synthesizer and the rule matcher work from. Streams keep the container's
//! own indices because output mappings refer to them (`-map 0:<index>`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// MediaSource
// ---------------------------------------------------------------------------

/// Catalog a job's files are listed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Radarr,
    Sonarr,
    Folder,
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radarr => write!(f, "radarr"),
            Self::Sonarr => write!(f, "sonarr"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamKind
// ---------------------------------------------------------------------------

/// Kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Attachment,
    Data,
}

impl StreamKind {
    /// Map an ffprobe `codec_type` string.
    pub fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitle" => Self::Subtitle,
            "attachment" => Self::Attachment,
            _ => Self::Data,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
            Self::Attachment => write!(f, "attachment"),
            Self::Data => write!(f, "data"),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaStream / MediaInfo
// ---------------------------------------------------------------------------

/// One elementary stream as reported by the prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStream {
    /// Index of the stream within the source container.
    pub index: u32,
    pub kind: StreamKind,
    /// Codec short name as reported by the prober (e.g. "eac3").
    pub codec_name: String,
    #[serde(default)]
    pub channels: Option<u32>,
    /// Language tag (ISO 639-2), if the stream carries one.
    #[serde(default)]
    pub language: Option<String>,
    /// Cover art and similar still images stored as a video stream.
    #[serde(default)]
    pub attached_pic: bool,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
}

impl MediaStream {
    /// An audio stream with the given codec, channel count and language.
    pub fn audio(index: u32, codec: &str, channels: u32, language: Option<&str>) -> Self {
        Self {
            index,
            kind: StreamKind::Audio,
            codec_name: codec.to_string(),
            channels: Some(channels),
            language: language.map(str::to_string),
            attached_pic: false,
            width: None,
            height: None,
            frame_rate: None,
        }
    }

    /// A video stream with the given codec.
    pub fn video(index: u32, codec: &str) -> Self {
        Self {
            index,
            kind: StreamKind::Video,
            codec_name: codec.to_string(),
            channels: None,
            language: None,
            attached_pic: false,
            width: None,
            height: None,
            frame_rate: None,
        }
    }

    /// A cover-art image stored as a video stream.
    pub fn attached_picture(index: u32, codec: &str) -> Self {
        Self {
            attached_pic: true,
            ..Self::video(index, codec)
        }
    }
}

/// Probed metadata for one media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// All streams in container order.
    pub streams: Vec<MediaStream>,
    /// Total duration, if determinable.
    #[serde(default)]
    pub duration: Option<Duration>,
    /// Container format name as reported by the prober.
    #[serde(default)]
    pub format_name: Option<String>,
    /// File size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

impl MediaInfo {
    /// Audio streams in container order.
    pub fn audio_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Audio)
    }

    /// Video streams in container order (including attached pictures).
    pub fn video_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Video)
    }

    /// The first video stream that is not an attached picture.
    pub fn primary_video(&self) -> Option<&MediaStream> {
        self.video_streams().find(|s| !s.attached_pic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> MediaInfo {
        MediaInfo {
            streams: vec![
                MediaStream::attached_picture(0, "mjpeg"),
                MediaStream::video(1, "h264"),
                MediaStream::audio(2, "aac", 2, Some("eng")),
                MediaStream {
                    kind: StreamKind::Subtitle,
                    ..MediaStream::video(3, "subrip")
                },
            ],
            duration: Some(Duration::from_secs(5400)),
            format_name: Some("matroska,webm".into()),
            size: Some(1_000_000),
        }
    }

    #[test]
    fn stream_filters() {
        let info = sample_info();
        assert_eq!(info.audio_streams().count(), 1);
        assert_eq!(info.video_streams().count(), 2);
        assert_eq!(info.primary_video().map(|s| s.index), Some(1));
    }

    #[test]
    fn kind_from_codec_type() {
        assert_eq!(StreamKind::from_codec_type("audio"), StreamKind::Audio);
        assert_eq!(StreamKind::from_codec_type("attachment"), StreamKind::Attachment);
        assert_eq!(StreamKind::from_codec_type("weird"), StreamKind::Data);
    }

    #[test]
    fn media_source_display_matches_serde() {
        for source in [MediaSource::Radarr, MediaSource::Sonarr, MediaSource::Folder] {
            let json = serde_json::to_string(&source).unwrap();
            assert_eq!(json, format!("\"{source}\""));
        }
    }
}
