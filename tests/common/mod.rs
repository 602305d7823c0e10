//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which lays out a media folder and a library file
//! in a temp dir and wires a full [`App`] around fake encoder and prober
//! collaborators.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ef_av::{split_command_line, EncodeOutcome, EncoderRunner, MediaProber, ProgressSender};
use ef_core::config::Config;
use ef_core::{MediaInfo, MediaSource, MediaStream, Result};
use ef_jobs::{FilterDefinition, JobDefinition, JsonLibraryStore, Library};
use ef_rules::{
    AudioAction, AudioRuleSet, AudioStreamRule, Preset, StreamCondition, TunableOption,
    TuningDomain, VideoOptionSetting,
};
use encodeforge::App;

/// Length reported for every probed file, sources and outputs alike.
pub const MEDIA_DURATION: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// Prober reporting one h264 video stream and one English aac stream.
#[derive(Default)]
pub struct FakeProber {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, _path: &Path, _content_hash: &str) -> Result<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaInfo {
            streams: vec![
                MediaStream::video(0, "h264"),
                MediaStream::audio(1, "aac", 2, Some("eng")),
            ],
            duration: Some(MEDIA_DURATION),
            format_name: Some("matroska,webm".into()),
            size: Some(1_000),
        })
    }
}

/// Sample sizes written for each `-crf` trial value; anything else is 120.
const TRIAL_SIZES: &[(&str, usize)] = &[("-crf 20", 100), ("-crf 24", 80), ("-crf 28", 60)];

/// Runner that writes the last argument of every command as its output file.
/// Trial sizes depend on the crf value and similarity is scored by size.
#[derive(Default)]
pub struct FakeRunner {
    pub commands: Mutex<Vec<String>>,
    pub similarity_calls: AtomicUsize,
}

impl FakeRunner {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl EncoderRunner for FakeRunner {
    async fn encode(
        &self,
        args: &str,
        _duration: Option<Duration>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<EncodeOutcome> {
        if cancel.is_cancelled() {
            return Ok(EncodeOutcome::Cancelled);
        }
        self.commands.lock().push(args.to_string());

        let size = TRIAL_SIZES
            .iter()
            .find(|(flag, _)| args.contains(flag))
            .map(|(_, size)| *size)
            .unwrap_or(120);
        let output = split_command_line(args)?.pop().unwrap_or_default();
        if !output.starts_with("/dev/") {
            tokio::fs::write(&output, vec![0u8; size]).await?;
        }
        progress.send(50.0, "encoding");
        progress.send(100.0, "encoding");
        Ok(EncodeOutcome::Completed)
    }

    async fn similarity(
        &self,
        _reference: &Path,
        encoded: &Path,
        _hardware_prefix: &str,
        _duration: Option<Duration>,
        _progress: &ProgressSender,
        _cancel: &CancellationToken,
    ) -> Result<Option<f64>> {
        self.similarity_calls.fetch_add(1, Ordering::SeqCst);
        let size = tokio::fs::metadata(encoded).await?.len();
        Ok(Some(match size {
            100 => 99.5,
            80 => 98.0,
            60 => 90.0,
            _ => 0.0,
        }))
    }

    async fn container_extension(&self, container: &str) -> Result<String> {
        Ok(match container {
            "mp4" => "mp4".into(),
            _ => "mkv".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Library fixtures
// ---------------------------------------------------------------------------

fn copy_all_audio() -> AudioRuleSet {
    AudioRuleSet::new(vec![AudioStreamRule::new(
        vec![StreamCondition::Any],
        AudioAction::Copy,
    )])
}

/// x265 into Matroska, audio copied.
pub fn hevc_preset() -> Preset {
    let mut preset = Preset::new("HEVC", "libx265");
    preset.container = Some("matroska".into());
    preset.audio_rules = copy_all_audio();
    preset
}

/// x265 with an auto-tuned crf.
pub fn tuned_preset() -> Preset {
    let mut preset = Preset::new("Tuned", "libx265");
    preset.container = Some("matroska".into());
    preset.audio_rules = copy_all_audio();
    preset.video_options = vec![VideoOptionSetting::auto(TunableOption {
        name: "crf".into(),
        arg: "-crf <val>".into(),
        include_pass: false,
        disabled_by_video_bitrate: false,
        domain: Some(TuningDomain::Values {
            values: vec!["20".into(), "24".into(), "28".into()],
        }),
    })];
    preset
}

pub fn folder_filter(name: &str, query: &str) -> FilterDefinition {
    FilterDefinition::new(name, MediaSource::Folder, query)
}

pub fn job(name: &str, filter: &str, preset: &str, destination: &Path) -> JobDefinition {
    JobDefinition {
        id: None,
        name: name.into(),
        filter: filter.into(),
        preset: preset.into(),
        destination: Some(destination.to_path_buf()),
        auto_import: false,
        auto_run: false,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A temp dir holding `media/`, `output/` and `library.json`, plus an [`App`]
/// whose folder catalog serves `media/`.
pub struct TestHarness {
    pub app: App,
    pub runner: Arc<FakeRunner>,
    pub prober: Arc<FakeProber>,
    pub media: PathBuf,
    pub output: PathBuf,
    pub library_path: PathBuf,
    _dir: TempDir,
}

impl TestHarness {
    /// Create `files` (relative to `media/`), then wire the app with
    /// `library` as its persisted library.
    pub fn new(files: &[&str], build_library: impl FnOnce(&Path) -> Library) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let media = dir.path().join("media");
        let output = dir.path().join("output");
        for file in files {
            let path = media.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"source").unwrap();
        }
        std::fs::create_dir_all(&media).unwrap();

        let library_path = dir.path().join("library.json");
        let library = build_library(&output);
        std::fs::write(&library_path, library.to_json_pretty().unwrap()).unwrap();

        let mut config = Config::default();
        config.catalog.folder_root = Some(media.clone());
        config.jobs.library_path = library_path.clone();

        let runner = Arc::new(FakeRunner::default());
        let prober = Arc::new(FakeProber::default());
        let store = Arc::new(JsonLibraryStore::open(&library_path).unwrap());
        let app = App::with_collaborators(config, store, runner.clone(), prober.clone());

        Self {
            app,
            runner,
            prober,
            media,
            output,
            library_path,
            _dir: dir,
        }
    }

    /// The library as currently written on disk.
    pub fn persisted_library(&self) -> Library {
        JsonLibraryStore::open(&self.library_path).unwrap().library()
    }
}
