//! Argument synthesis: turns a [`Preset`] and probed [`MediaInfo`] into
//! encoder command lines.
//!
//! Commands are produced as templates holding `{input}` and `{output}`
//! placeholders, filled per work item with [`EncoderArguments::render`].
//!
//! Single pass:
//!
//! ```text
//! [-hwaccel <tag> ]-y -i "{input}"<video><extra><audio> -map 0:s? -c:s copy -map 0:t? -map 0:d? -movflags use_metadata_tags "{output}"
//! ```
//!
//! With a target video bitrate, a first pass mapping video only to the null
//! sink precedes the full command, with `%passnum%` set to 1 and 2.

use std::path::Path;

use ef_core::{Error, MediaInfo, Result};
use ef_rules::{Preset, PASS_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::autotune::{AutoTune, TuneOutcome};

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const TRAILING_MAPS: &str =
    " -map 0:s? -c:s copy -map 0:t? -map 0:d? -movflags use_metadata_tags";

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Synthesized command line templates, one per pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncoderArguments {
    passes: Vec<String>,
}

impl EncoderArguments {
    pub fn new(passes: Vec<String>) -> Self {
        Self { passes }
    }

    pub fn passes(&self) -> &[String] {
        &self.passes
    }

    pub fn is_two_pass(&self) -> bool {
        self.passes.len() == 2
    }

    /// Fill the placeholders for a concrete source and destination.
    pub fn render(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.passes
            .iter()
            .map(|template| fill(template, &input, &output))
            .collect()
    }
}

/// Replace both placeholders in one scan so a path containing a placeholder
/// is never substituted twice.
fn fill(template: &str, input: &str, output: &str) -> String {
    let mut out = String::with_capacity(template.len() + input.len() + output.len());
    let mut rest = template;
    loop {
        let next_input = rest.find(INPUT_PLACEHOLDER);
        let next_output = rest.find(OUTPUT_PLACEHOLDER);
        let (at, placeholder, value) = match (next_input, next_output) {
            (Some(i), Some(o)) if o < i => (o, OUTPUT_PLACEHOLDER, output),
            (Some(i), _) => (i, INPUT_PLACEHOLDER, input),
            (None, Some(o)) => (o, OUTPUT_PLACEHOLDER, output),
            (None, None) => break,
        };
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

/// Result of a synthesis attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(EncoderArguments),
    /// Cancellation was observed; no partial command is returned.
    Cancelled,
}

/// Build the encoder command line(s) for one source.
///
/// Auto-tuned options are resolved through `tuner` at most once, the first
/// time a video stream needs them.
///
/// # Errors
///
/// - [`Error::NoStreams`] if the metadata has no streams.
/// - [`Error::Configuration`] for missing option definitions or audio rules
///   without an encoder.
/// - Any error raised by the tuner.
pub async fn synthesize(
    preset: &Preset,
    info: &MediaInfo,
    tuner: &dyn AutoTune,
    cancel: &CancellationToken,
) -> Result<BuildOutcome> {
    if info.streams.is_empty() {
        return Err(Error::NoStreams(format!(
            "no streams found while building arguments for preset '{}'",
            preset.name
        )));
    }

    // Audio
    if cancel.is_cancelled() {
        return Ok(BuildOutcome::Cancelled);
    }
    let mut audio = String::new();
    for output in preset.audio_rules.plan(info.audio_streams())? {
        if cancel.is_cancelled() {
            return Ok(BuildOutcome::Cancelled);
        }
        audio.push_str(&output.arguments());
    }
    tracing::debug!(preset = %preset.name, audio = %audio, "audio arguments");

    // Video
    let mut video = String::new();
    if preset.is_copy_encoder() {
        video.push_str(" -map 0:v -c:v copy");
    } else {
        let mut params: Option<String> = None;
        for (n, stream) in info.video_streams().enumerate() {
            let map = format!(" -map 0:{} -c:v:{n}", stream.index);
            if stream.attached_pic {
                video.push_str(&format!("{map} copy"));
            } else {
                if params.is_none() {
                    match video_params(preset, tuner, cancel).await? {
                        Some(p) => params = Some(p),
                        None => return Ok(BuildOutcome::Cancelled),
                    }
                }
                let params = params.as_deref().unwrap_or_default();
                let encoder = preset.video_encoder.trim();
                let fps = preset.frame_rate_fragment();
                match preset.video_bitrate {
                    Some(kbps) => {
                        let pass = if preset.pass_in_options()? {
                            String::new()
                        } else {
                            format!(" -pass {PASS_PLACEHOLDER}")
                        };
                        video.push_str(&format!(
                            "{map} {encoder}{params} -b:v {kbps}k{fps}{pass}"
                        ));
                    }
                    None => video.push_str(&format!("{map} {encoder}{params}{fps}")),
                }
            }
            if cancel.is_cancelled() {
                return Ok(BuildOutcome::Cancelled);
            }
        }
    }
    tracing::debug!(preset = %preset.name, video = %video, "video arguments");

    let hw = preset.hardware_prefix();
    let extra = preset.extra_fragment();
    let full = format!(
        "{hw}-y -i \"{INPUT_PLACEHOLDER}\"{video}{extra}{audio}{TRAILING_MAPS} \"{OUTPUT_PLACEHOLDER}\""
    );

    let passes = if preset.is_two_pass() {
        let first = format!("{hw}-y -i \"{INPUT_PLACEHOLDER}\"{video} -an -f null {NULL_SINK}");
        vec![
            first.replace(PASS_PLACEHOLDER, "1"),
            full.replace(PASS_PLACEHOLDER, "2"),
        ]
    } else {
        vec![full]
    };

    if cancel.is_cancelled() {
        return Ok(BuildOutcome::Cancelled);
    }
    Ok(BuildOutcome::Built(EncoderArguments::new(passes)))
}

/// Fixed option fragment followed by the auto-tuned fragment, or `None` if
/// tuning was cancelled.
async fn video_params(
    preset: &Preset,
    tuner: &dyn AutoTune,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let mut params = preset.fixed_options_fragment()?;
    if preset.has_auto_tuned_options() {
        tracing::info!(preset = %preset.name, "calculating best option values");
        match tuner.tune(preset, cancel).await? {
            TuneOutcome::Tuned(tuned) => {
                tracing::debug!(fragment = %tuned.fragment, "auto-tuned options");
                params.push_str(&tuned.fragment);
            }
            TuneOutcome::Cancelled => return Ok(None),
        }
    }
    Ok(Some(params))
}
