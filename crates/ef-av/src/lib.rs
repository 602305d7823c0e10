//! # ef-av
//!
//! Encoder integration for encodeforge.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   stderr streaming and cancellation.
//! - **Probing** ([`MediaProber`], [`FfprobeProber`], [`CachingProber`]).
//! - **Encoding** ([`EncoderRunner`], [`FfmpegRunner`]) -- encodes with
//!   progress, SSIM similarity, container extension lookup.
//! - **Argument synthesis** ([`synthesize`]) -- preset + metadata to command
//!   line templates.
//! - **Auto-tune** ([`AutoTuner`], [`select_best`]) -- trial-encode search
//!   for auto-calculated option values.

pub mod args;
pub mod autotune;
pub mod command;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use args::{synthesize, BuildOutcome, EncoderArguments};
pub use autotune::{
    select_best, AutoTune, AutoTuner, NoAutoTune, OptionTrials, TrialObserver, TrialResult,
    TuneOutcome, TuneSession, TunedOptions,
};
pub use command::{split_command_line, Completion, ToolCommand, ToolOutput};
pub use probe::{CachingProber, FfprobeProber, MediaProber};
pub use progress::{ProgressParser, ProgressSender};
pub use runner::{EncodeOutcome, EncoderRunner, FfmpegRunner};
pub use tools::{ToolInfo, ToolRegistry};
pub use workspace::Workspace;
