//! Auto-tune engine: picks values for auto-calculated video options by
//! trial-encoding a short reference sample.
//!
//! The sample is three clips cut at 1/4, 1/2 and 3/4 of the source and
//! concatenated without re-encoding. Options are tuned one at a time in
//! preset order; each chosen value is carried as a prefix into the trials of
//! the options after it. Every trial is scored by output size and by its
//! similarity to the reference sample, and [`select_best`] picks the winner.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ef_core::config::{AutoTuneConfig, AutoTuneMode};
use ef_core::{Error, Result};
use ef_rules::{Preset, TunableOption};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressSender;
use crate::runner::{EncodeOutcome, EncoderRunner};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one candidate value's trial encode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub value: String,
    pub processing: bool,
    /// Encode progress, 0-100.
    pub encode_progress: f32,
    /// Similarity measurement progress, 0-100.
    pub similarity_progress: f32,
    /// Output size in bytes; `None` if the trial produced no output.
    pub size: Option<u64>,
    /// Similarity to the reference on a 0-100 scale; `None` if the
    /// measurement failed.
    pub similarity: Option<f64>,
    /// `size / reference size`.
    pub size_ratio: Option<f64>,
}

impl TrialResult {
    pub fn pending(value: &str) -> Self {
        Self {
            value: value.to_string(),
            ..Self::default()
        }
    }

    pub fn measured(value: &str, size: u64, similarity: Option<f64>) -> Self {
        Self {
            value: value.to_string(),
            size: Some(size),
            similarity,
            ..Self::default()
        }
    }
}

/// Trials for one tuned option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTrials {
    pub option: String,
    /// Option flag template.
    pub argument: String,
    pub results: Vec<TrialResult>,
    /// The winning value, once selected.
    pub chosen: Option<String>,
}

impl OptionTrials {
    fn new(option: &TunableOption, candidates: &[String]) -> Self {
        Self {
            option: option.name.clone(),
            argument: option.arg.clone(),
            results: candidates.iter().map(|c| TrialResult::pending(c)).collect(),
            chosen: None,
        }
    }
}

/// Resolved auto-tuned options.
#[derive(Debug, Clone, PartialEq)]
pub struct TunedOptions {
    /// Rendered options, each with a leading space.
    pub fragment: String,
    pub trials: Vec<OptionTrials>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TuneOutcome {
    Tuned(TunedOptions),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

fn cmp_similarity(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Pick the winning trial, returning its position.
///
/// 1. In first-past-the-post mode: the smallest output whose similarity
///    meets `threshold`, ties broken by higher similarity.
/// 2. Otherwise the highest similarity among outputs smaller than
///    `original_size`, ties broken by smaller size.
/// 3. Otherwise the smallest output.
///
/// Trials without an output size never win. Remaining ties go to the
/// earlier candidate.
pub fn select_best(
    results: &[TrialResult],
    original_size: u64,
    mode: AutoTuneMode,
    threshold: f64,
) -> Option<usize> {
    let sized = || {
        results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.size.map(|size| (i, size, r.similarity)))
    };

    if mode == AutoTuneMode::FirstPastThePost {
        let past_the_post = sized()
            .filter(|(_, _, sim)| sim.is_some_and(|s| s >= threshold))
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| cmp_similarity(b.2, a.2)));
        if let Some((i, _, _)) = past_the_post {
            return Some(i);
        }
    }

    let best_shrinker = sized()
        .filter(|(_, size, _)| *size < original_size)
        .min_by(|a, b| cmp_similarity(b.2, a.2).then_with(|| a.1.cmp(&b.1)));
    if let Some((i, _, _)) = best_shrinker {
        return Some(i);
    }

    sized().min_by_key(|(_, size, _)| *size).map(|(i, _, _)| i)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Resolves a preset's auto-calculated options to a rendered fragment.
#[async_trait]
pub trait AutoTune: Send + Sync {
    async fn tune(&self, preset: &Preset, cancel: &CancellationToken) -> Result<TuneOutcome>;
}

/// Tuner used where no source sample is available; any request for
/// auto-tuned options is a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutoTune;

#[async_trait]
impl AutoTune for NoAutoTune {
    async fn tune(&self, preset: &Preset, _cancel: &CancellationToken) -> Result<TuneOutcome> {
        Err(Error::Configuration(format!(
            "preset '{}' has auto-calculated options but no source is available to tune against",
            preset.name
        )))
    }
}

/// Callback receiving a snapshot of all trial tables after every change.
pub type TrialObserver = Arc<dyn Fn(&[OptionTrials]) + Send + Sync>;

/// Factory for per-source tuning sessions.
#[derive(Clone)]
pub struct AutoTuner {
    runner: Arc<dyn EncoderRunner>,
    config: AutoTuneConfig,
}

impl AutoTuner {
    pub fn new(runner: Arc<dyn EncoderRunner>, config: AutoTuneConfig) -> Self {
        Self { runner, config }
    }

    /// A session that tunes against `source`, writing intermediate files
    /// with the given container `extension`.
    pub fn session(&self, source: &Path, duration: Option<Duration>, extension: &str) -> TuneSession {
        TuneSession {
            runner: self.runner.clone(),
            config: self.config.clone(),
            source: source.to_path_buf(),
            duration,
            extension: extension.trim_start_matches('.').to_string(),
            observer: None,
        }
    }
}

impl std::fmt::Debug for AutoTuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoTuner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Auto-tune bound to one source file.
pub struct TuneSession {
    runner: Arc<dyn EncoderRunner>,
    config: AutoTuneConfig,
    source: PathBuf,
    duration: Option<Duration>,
    extension: String,
    observer: Option<TrialObserver>,
}

impl TuneSession {
    /// Builder: report trial table changes to `observer`.
    pub fn with_observer(mut self, observer: TrialObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(observer: &Option<TrialObserver>, tables: &Mutex<Vec<OptionTrials>>) {
        if let Some(observer) = observer {
            let snapshot = tables.lock().clone();
            observer(&snapshot);
        }
    }

    /// Cut three clips and concatenate them into one reference sample.
    async fn build_reference(
        &self,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let ext = &self.extension;
        let duration = self
            .duration
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| self.config.fallback_duration())
            .as_secs_f64();
        let pitch = duration / 4.0;
        let sample_secs = self.config.sample_length().as_secs();

        let mut list = String::new();
        for i in 1..4u32 {
            let clip = workspace.file(&format!("sample{i}.{ext}"));
            let args = format!(
                "-y -ss {} -t {sample_secs} -i \"{}\" -codec copy -an \"{}\"",
                pitch * f64::from(i),
                self.source.display(),
                clip.display()
            );
            if self.run(&args, None, &ProgressSender::noop(), cancel).await? == EncodeOutcome::Cancelled {
                return Ok(None);
            }
            list.push_str(&format!(
                "file '{}'\n",
                clip.display().to_string().replace('\'', r"'\''")
            ));
        }

        let list_file = workspace.file("sample_list.txt");
        tokio::fs::write(&list_file, list)
            .await
            .map_err(|e| Error::filesystem(&list_file, format!("failed to write sample list: {e}")))?;

        let reference = workspace.file(&format!("reference.{ext}"));
        let args = format!(
            "-y -f concat -safe 0 -i \"{}\" -c copy \"{}\"",
            list_file.display(),
            reference.display()
        );
        if self.run(&args, None, &ProgressSender::noop(), cancel).await? == EncodeOutcome::Cancelled {
            return Ok(None);
        }
        Ok(Some(reference))
    }

    async fn run(
        &self,
        args: &str,
        duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<EncodeOutcome> {
        if cancel.is_cancelled() {
            return Ok(EncodeOutcome::Cancelled);
        }
        self.runner.encode(args, duration, progress, cancel).await
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

#[async_trait]
impl AutoTune for TuneSession {
    async fn tune(&self, preset: &Preset, cancel: &CancellationToken) -> Result<TuneOutcome> {
        // Resolve every definition and domain before any encoding starts.
        let mut options: Vec<(&TunableOption, Vec<String>)> = Vec::new();
        for setting in preset.auto_tuned_options() {
            let option = setting.definition()?;
            let candidates = option.candidates()?;
            options.push((option, candidates));
        }
        if options.is_empty() || cancel.is_cancelled() {
            return Ok(if cancel.is_cancelled() {
                TuneOutcome::Cancelled
            } else {
                TuneOutcome::Tuned(TunedOptions {
                    fragment: String::new(),
                    trials: Vec::new(),
                })
            });
        }

        let workspace = Workspace::new()?;
        tracing::info!(source = %self.source.display(), preset = %preset.name, "building auto-tune reference sample");
        let Some(reference) = self.build_reference(&workspace, cancel).await? else {
            return Ok(TuneOutcome::Cancelled);
        };
        let original_size = file_size(&reference).await.ok_or_else(|| {
            Error::filesystem(&reference, "reference sample was not produced")
        })?;

        let tables = Arc::new(Mutex::new(
            options
                .iter()
                .map(|(option, candidates)| OptionTrials::new(option, candidates))
                .collect::<Vec<_>>(),
        ));
        Self::notify(&self.observer, &tables);

        let hw = preset.hardware_prefix();
        let fps = preset.frame_rate_fragment();
        let encoder = preset.video_encoder.trim();
        let trial_file = workspace.file(&format!("trial.{}", self.extension));
        let sample_duration = Some(self.config.sample_length() * 3);
        let mut prefix = String::new();

        for (k, (option, candidates)) in options.iter().enumerate() {
            for (j, value) in candidates.iter().enumerate() {
                {
                    let mut t = tables.lock();
                    t[k].results[j].processing = true;
                }
                Self::notify(&self.observer, &tables);

                let args = format!(
                    "{hw}-y -i \"{}\" -map 0:V -c:V {encoder}{prefix} {}{fps} \"{}\"",
                    reference.display(),
                    option.render(value),
                    trial_file.display()
                );
                tracing::debug!(option = %option.name, value = %value, args = %args, "auto-tune trial");

                let encode_progress = {
                    let tables = tables.clone();
                    let observer = self.observer.clone();
                    ProgressSender::new(move |pct, _| {
                        tables.lock()[k].results[j].encode_progress = pct;
                        Self::notify(&observer, &tables);
                    })
                };
                let _ = tokio::fs::remove_file(&trial_file).await;
                let size = match self.run(&args, sample_duration, &encode_progress, cancel).await {
                    Ok(EncodeOutcome::Completed) => file_size(&trial_file).await,
                    Ok(EncodeOutcome::Cancelled) => return Ok(TuneOutcome::Cancelled),
                    Err(e) => {
                        tracing::warn!(option = %option.name, value = %value, error = %e, "trial encode failed");
                        None
                    }
                };

                let mut similarity = None;
                if size.is_some() {
                    let similarity_progress = {
                        let tables = tables.clone();
                        let observer = self.observer.clone();
                        ProgressSender::new(move |pct, _| {
                            tables.lock()[k].results[j].similarity_progress = pct;
                            Self::notify(&observer, &tables);
                        })
                    };
                    similarity = match self
                        .runner
                        .similarity(&reference, &trial_file, &hw, sample_duration, &similarity_progress, cancel)
                        .await
                    {
                        Ok(score) => score,
                        Err(e) => {
                            tracing::warn!(option = %option.name, value = %value, error = %e, "similarity measurement failed");
                            None
                        }
                    };
                }
                if cancel.is_cancelled() {
                    return Ok(TuneOutcome::Cancelled);
                }

                {
                    let mut t = tables.lock();
                    let result = &mut t[k].results[j];
                    result.processing = false;
                    result.size = size;
                    result.similarity = similarity;
                    result.size_ratio = size
                        .filter(|_| original_size > 0)
                        .map(|s| s as f64 / original_size as f64);
                }
                Self::notify(&self.observer, &tables);
                tracing::debug!(option = %option.name, value = %value, size = ?size, similarity = ?similarity, "trial finished");
            }

            let results = tables.lock()[k].results.clone();
            let best = select_best(&results, original_size, self.config.mode, self.config.threshold)
                .ok_or_else(|| {
                    Error::execution(
                        "auto-tune",
                        format!("no trial produced output for option '{}'", option.name),
                    )
                })?;
            let chosen = &candidates[best];
            prefix.push_str(&format!(" {}", option.render(chosen)));
            tables.lock()[k].chosen = Some(chosen.clone());
            Self::notify(&self.observer, &tables);

            tracing::info!(
                option = %option.name,
                value = %chosen,
                size = ?results[best].size,
                similarity = ?results[best].similarity,
                "best value selected"
            );
        }

        let trials = tables.lock().clone();
        Ok(TuneOutcome::Tuned(TunedOptions {
            fragment: prefix,
            trials,
        }))
    }
}
