//! Running encodes and similarity measurements through ffmpeg.
//!
//! The [`EncoderRunner`] trait is the seam the orchestrator and the auto-tune
//! engine execute through; [`FfmpegRunner`] is the real implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ef_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::command::{split_command_line, Completion, ToolCommand};
use crate::progress::{ProgressParser, ProgressSender};
use crate::tools::ToolRegistry;

/// Default encode timeout: 24 hours.
const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(86_400);

/// How an encode ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Completed,
    Cancelled,
}

/// Executes encoder command lines and similarity measurements.
#[async_trait]
pub trait EncoderRunner: Send + Sync {
    /// Run one encoder command line (without the program name).
    ///
    /// `duration` is the input duration used to turn encoder time stamps
    /// into a percentage.
    async fn encode(
        &self,
        args: &str,
        duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<EncodeOutcome>;

    /// Measure how similar `encoded` is to `reference`, on a 0-100 scale.
    ///
    /// Returns `Ok(None)` when cancelled or when no score could be read.
    async fn similarity(
        &self,
        reference: &Path,
        encoded: &Path,
        hardware_prefix: &str,
        duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>>;

    /// File extension for a container (muxer) name, without the dot.
    async fn container_extension(&self, container: &str) -> Result<String>;
}

/// [`EncoderRunner`] backed by the ffmpeg CLI.
pub struct FfmpegRunner {
    ffmpeg: PathBuf,
    timeout: Duration,
    extensions: DashMap<String, String>,
}

impl FfmpegRunner {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self {
            ffmpeg,
            timeout: DEFAULT_ENCODE_TIMEOUT,
            extensions: DashMap::new(),
        }
    }

    pub fn from_registry(tools: &ToolRegistry) -> Result<Self> {
        Ok(Self::new(tools.ffmpeg()?.to_path_buf()))
    }

    /// Builder: set the maximum duration of a single encode.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(self.timeout);
        cmd.args(["-hide_banner", "-progress", "pipe:2", "-nostats"]);
        cmd
    }
}

#[async_trait]
impl EncoderRunner for FfmpegRunner {
    async fn encode(
        &self,
        args: &str,
        duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<EncodeOutcome> {
        let mut cmd = self.command();
        cmd.args(split_command_line(args)?);
        tracing::info!(args = %args, "encoding");

        let mut parser = ProgressParser::new(duration.map(|d| d.as_secs_f64()));
        let completion = cmd
            .execute_with_stderr_callback(
                |line| {
                    if let Some(pct) = parser.feed(line) {
                        progress.send(pct, "encoding");
                    }
                },
                cancel,
            )
            .await?;

        Ok(match completion {
            Completion::Finished(_) => EncodeOutcome::Completed,
            Completion::Cancelled => EncodeOutcome::Cancelled,
        })
    }

    async fn similarity(
        &self,
        reference: &Path,
        encoded: &Path,
        hardware_prefix: &str,
        duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>> {
        let mut cmd = self.command();
        cmd.args(split_command_line(hardware_prefix)?);
        cmd.arg("-i").arg(encoded.to_string_lossy());
        cmd.arg("-i").arg(reference.to_string_lossy());
        cmd.args(["-lavfi", "ssim", "-f", "null", "-"]);

        let mut parser = ProgressParser::new(duration.map(|d| d.as_secs_f64()));
        let mut score = None;
        let completion = cmd
            .execute_with_stderr_callback(
                |line| {
                    if let Some(pct) = parser.feed(line) {
                        progress.send(pct, "measuring similarity");
                    } else if let Some(s) = parse_ssim_score(line) {
                        score = Some(s);
                    }
                },
                cancel,
            )
            .await?;

        match completion {
            Completion::Cancelled => Ok(None),
            Completion::Finished(_) => {
                if score.is_none() {
                    tracing::warn!(encoded = %encoded.display(), "ffmpeg reported no SSIM score");
                }
                Ok(score)
            }
        }
    }

    async fn container_extension(&self, container: &str) -> Result<String> {
        let key = container.trim().to_lowercase();
        if let Some(ext) = self.extensions.get(&key) {
            return Ok(ext.value().clone());
        }

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(["-hide_banner", "-h"]).arg(format!("muxer={key}"));
        let from_ffmpeg = match cmd.execute().await {
            Ok(output) => parse_common_extension(&output.stdout),
            Err(e) => {
                tracing::debug!(container = %key, error = %e, "muxer help unavailable");
                None
            }
        };

        let ext = from_ffmpeg
            .or_else(|| fallback_extension(&key).map(str::to_string))
            .ok_or_else(|| {
                Error::Configuration(format!("no file extension known for container '{key}'"))
            })?;
        self.extensions.insert(key, ext.clone());
        Ok(ext)
    }
}

impl std::fmt::Debug for FfmpegRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegRunner")
            .field("ffmpeg", &self.ffmpeg)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Read the overall score from an ffmpeg SSIM summary line, scaled to 0-100.
///
/// `[Parsed_ssim_0 @ 0x..] SSIM Y:0.99 (20.0) U:0.99 (21.2) V:0.99 (22.1) All:0.991234 (20.57)`
pub fn parse_ssim_score(line: &str) -> Option<f64> {
    if !line.contains("SSIM ") {
        return None;
    }
    let rest = &line[line.find("All:")? + "All:".len()..];
    let value = rest.split_whitespace().next()?;
    value.parse::<f64>().ok().map(|v| v * 100.0)
}

/// First extension from `ffmpeg -h muxer=<name>` output
/// (`    Common extensions: mkv.`).
pub fn parse_common_extension(help: &str) -> Option<String> {
    help.lines()
        .find_map(|line| line.trim().strip_prefix("Common extensions:"))
        .and_then(|list| list.trim().trim_end_matches('.').split(',').next())
        .map(|ext| ext.trim().to_string())
        .filter(|ext| !ext.is_empty())
}

/// Built-in extension table for common muxers.
pub fn fallback_extension(container: &str) -> Option<&'static str> {
    Some(match container {
        "matroska" | "mkv" => "mkv",
        "mp4" => "mp4",
        "mov" => "mov",
        "webm" => "webm",
        "avi" => "avi",
        "mpegts" => "ts",
        "flv" => "flv",
        "ogg" => "ogg",
        "mp3" => "mp3",
        "flac" => "flac",
        _ => return None,
    })
}
