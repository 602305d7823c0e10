//! Media-metadata probing.
//!
//! [`FfprobeProber`] shells out to
//! `ffprobe -v quiet -print_format json -show_format -show_streams` and maps
//! the JSON into [`MediaInfo`]. [`CachingProber`] memoizes any prober by the
//! file's content hash.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ef_core::{Error, MediaInfo, MediaStream, Result, StreamKind};
use serde::Deserialize;

use crate::command::ToolCommand;

/// Something that can read stream-level metadata from a media file.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe `path`. `content_hash` identifies the file's contents and may
    /// be used as a cache key.
    async fn probe(&self, path: &Path, content_hash: &str) -> Result<MediaInfo>;
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path, _content_hash: &str) -> Result<MediaInfo> {
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path.to_string_lossy())
            .execute()
            .await?;
        parse_ffprobe_json(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

/// Parse `ffprobe -print_format json` output.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let streams = output
        .streams
        .into_iter()
        .map(|s| MediaStream {
            index: s.index,
            kind: StreamKind::from_codec_type(s.codec_type.as_deref().unwrap_or("")),
            codec_name: s.codec_name.unwrap_or_default().to_lowercase(),
            channels: s.channels,
            language: s
                .tags
                .language
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty()),
            attached_pic: s.disposition.attached_pic == 1,
            width: s.width,
            height: s.height,
            frame_rate: s
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate)),
        })
        .collect();

    let (format_name, duration, size) = match output.format {
        Some(f) => (
            f.format_name,
            f.duration
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
            f.size.and_then(|s| s.parse::<u64>().ok()),
        ),
        None => (None, None, None),
    };

    Ok(MediaInfo {
        streams,
        duration,
        format_name,
        size,
    })
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };
    (fps > 0.0).then_some(fps)
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

/// Memoizes probe results by content hash.
pub struct CachingProber {
    inner: Arc<dyn MediaProber>,
    cache: DashMap<String, MediaInfo>,
}

impl CachingProber {
    pub fn new(inner: Arc<dyn MediaProber>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate(&self, content_hash: &str) {
        self.cache.remove(content_hash);
    }
}

#[async_trait]
impl MediaProber for CachingProber {
    async fn probe(&self, path: &Path, content_hash: &str) -> Result<MediaInfo> {
        if let Some(hit) = self.cache.get(content_hash) {
            tracing::trace!(path = %path.display(), "probe cache hit");
            return Ok(hit.value().clone());
        }
        let info = self.inner.probe(path, content_hash).await?;
        if !content_hash.is_empty() {
            self.cache.insert(content_hash.to_string(), info.clone());
        }
        Ok(info)
    }
}

impl std::fmt::Debug for CachingProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingProber")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}
