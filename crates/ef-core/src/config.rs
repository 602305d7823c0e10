//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! tool, auto-tune, job and catalog sections. Every section defaults
//! sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub auto_tune: AutoTuneConfig,
    pub jobs: JobsConfig,
    pub catalog: CatalogConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("config parse error: {e}")))
    }

    /// Read and parse `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::filesystem(path, e.to_string())),
        }
    }

    /// Like [`Config::load`], but any failure is logged and replaced by the
    /// defaults so start-up never stops on a bad config file.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
            Self::default()
        })
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=100.0).contains(&self.auto_tune.threshold) {
            warnings.push(format!(
                "auto_tune.threshold {} is outside 0-100; similarity scores never exceed 100",
                self.auto_tune.threshold
            ));
        }

        if self.auto_tune.sample_length_secs == 0 {
            warnings.push("auto_tune.sample_length_secs is 0; samples will be empty".into());
        }

        if self.jobs.log_capacity == 0 {
            warnings.push("jobs.log_capacity is 0; job logs will keep only the latest entry".into());
        }

        for (name, path) in [
            ("ffmpeg_path", &self.tools.ffmpeg_path),
            ("ffprobe_path", &self.tools.ffprobe_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "tools.{name} {} does not exist; falling back to PATH",
                        p.display()
                    ));
                }
            }
        }

        if let Some(root) = &self.catalog.folder_root {
            if !root.is_dir() {
                warnings.push(format!(
                    "catalog.folder_root {} is not a directory",
                    root.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// How the auto-tune engine picks a winner among trial results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTuneMode {
    /// Highest similarity among candidates that shrink the sample.
    #[default]
    BestEffort,
    /// Smallest candidate whose similarity meets the threshold.
    FirstPastThePost,
}

/// Auto-tune search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTuneConfig {
    pub mode: AutoTuneMode,
    /// Similarity threshold (0-100) for [`AutoTuneMode::FirstPastThePost`].
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Length of each of the three sample clips.
    #[serde(default = "default_sample_length")]
    pub sample_length_secs: u64,
    /// Source duration assumed when the probe reports none.
    #[serde(default = "default_fallback_duration")]
    pub fallback_duration_secs: u64,
}

fn default_threshold() -> f64 {
    99.0
}
fn default_sample_length() -> u64 {
    10
}
fn default_fallback_duration() -> u64 {
    3600
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            mode: AutoTuneMode::default(),
            threshold: default_threshold(),
            sample_length_secs: default_sample_length(),
            fallback_duration_secs: default_fallback_duration(),
        }
    }
}

impl AutoTuneConfig {
    pub fn sample_length(&self) -> Duration {
        Duration::from_secs(self.sample_length_secs)
    }

    pub fn fallback_duration(&self) -> Duration {
        Duration::from_secs(self.fallback_duration_secs)
    }
}

/// Job persistence and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// JSON file holding jobs, presets and filters.
    #[serde(default = "default_library_path")]
    pub library_path: PathBuf,
    /// Maximum entries retained in each job's log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Upper bound for a single encode.
    #[serde(default = "default_encode_timeout")]
    pub encode_timeout_secs: u64,
}

fn default_library_path() -> PathBuf {
    PathBuf::from("library.json")
}
fn default_log_capacity() -> usize {
    500
}
fn default_encode_timeout() -> u64 {
    86_400
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            library_path: default_library_path(),
            log_capacity: default_log_capacity(),
            encode_timeout_secs: default_encode_timeout(),
        }
    }
}

impl JobsConfig {
    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }
}

/// Catalog service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Prefix joined in front of paths reported by the catalog, for when the
    /// catalog sees the library under a different mount point.
    pub base_path: Option<PathBuf>,
    /// Root directory served by the folder catalog; unset disables it.
    pub folder_root: Option<PathBuf>,
}
