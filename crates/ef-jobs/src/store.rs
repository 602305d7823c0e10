//! JSON persistence of jobs, presets and filters.
//!
//! A [`Library`] is the whole persisted document. [`JsonLibraryStore`] keeps
//! it in memory, serves it as the preset and filter registries and writes it
//! back to disk when the job set changes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ef_core::{Error, Result};
use ef_rules::Preset;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::collaborators::{FilterDefinition, FilterRegistry, JobStore, PresetRegistry};
use crate::job::JobDefinition;

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Library {
    pub jobs: Vec<JobDefinition>,
    pub presets: Vec<Preset>,
    pub filters: Vec<FilterDefinition>,
}

impl Library {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("library parse error: {e}")))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("library serialize error: {e}")))
    }

    /// Problems that would make jobs fail to initialise.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for preset in &self.presets {
            if let Err(e) = preset.validate() {
                warnings.push(format!("preset '{}': {e}", preset.name));
            }
        }
        for job in &self.jobs {
            if !self.filters.iter().any(|f| f.name == job.filter) {
                warnings.push(format!("job '{}': unknown filter '{}'", job.name, job.filter));
            }
            if !self.presets.iter().any(|p| p.name == job.preset) {
                warnings.push(format!("job '{}': unknown preset '{}'", job.name, job.preset));
            }
        }
        warnings
    }
}

/// File-backed [`Library`].
#[derive(Debug)]
pub struct JsonLibraryStore {
    path: PathBuf,
    library: RwLock<Library>,
}

impl JsonLibraryStore {
    pub fn new(path: impl Into<PathBuf>, library: Library) -> Self {
        Self {
            path: path.into(),
            library: RwLock::new(library),
        }
    }

    /// Load from `path`; a missing file yields an empty library.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the file is not a valid library, or an I/O
    /// error if it cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let library = match std::fs::read_to_string(&path) {
            Ok(contents) => Library::from_json(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No library at {}; starting empty", path.display());
                Library::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(path, library))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole library.
    pub fn library(&self) -> Library {
        self.library.read().clone()
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.library.read().presets.clone()
    }

    pub fn filters(&self) -> Vec<FilterDefinition> {
        self.library.read().filters.clone()
    }

    /// Insert or replace a preset by name.
    pub fn upsert_preset(&self, preset: Preset) {
        let mut library = self.library.write();
        match library.presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => library.presets.push(preset),
        }
    }

    /// Insert or replace a filter by name.
    pub fn upsert_filter(&self, filter: FilterDefinition) {
        let mut library = self.library.write();
        match library.filters.iter_mut().find(|f| f.name == filter.name) {
            Some(existing) => *existing = filter,
            None => library.filters.push(filter),
        }
    }

    /// Write the library to disk, replacing the file atomically.
    pub async fn persist(&self) -> Result<()> {
        let json = self.library.read().to_json_pretty()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::filesystem(parent, format!("failed to create directory: {e}")))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::filesystem(&tmp, format!("failed to write library: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::filesystem(&self.path, format!("failed to replace library: {e}")))?;
        tracing::debug!("Library saved to {}", self.path.display());
        Ok(())
    }
}

impl FilterRegistry for JsonLibraryStore {
    fn filter(&self, name: &str) -> Option<FilterDefinition> {
        self.library.read().filters.iter().find(|f| f.name == name).cloned()
    }
}

impl PresetRegistry for JsonLibraryStore {
    fn preset(&self, name: &str) -> Option<Preset> {
        self.library.read().presets.iter().find(|p| p.name == name).cloned()
    }
}

#[async_trait]
impl JobStore for JsonLibraryStore {
    async fn load_jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.library.read().jobs.clone())
    }

    async fn save_jobs(&self, jobs: &[JobDefinition]) -> Result<()> {
        self.library.write().jobs = jobs.to_vec();
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use ef_core::{JobId, MediaSource};

    fn sample() -> Library {
        Library {
            jobs: vec![JobDefinition {
                id: Some(JobId::new()),
                name: "Movies".into(),
                filter: "everything".into(),
                preset: "HEVC".into(),
                destination: None,
                auto_import: false,
                auto_run: false,
            }],
            presets: vec![Preset::new("HEVC", "libx265")],
            filters: vec![FilterDefinition::new("everything", MediaSource::Folder, ".*")],
        }
    }

    #[test]
    fn empty_document_is_valid() {
        assert_eq!(Library::from_json("{}").unwrap(), Library::default());
        assert!(matches!(Library::from_json("[]"), Err(Error::Configuration(_))));
    }

    #[test]
    fn validate_reports_dangling_references() {
        let mut library = sample();
        assert!(library.validate().is_empty());
        library.jobs[0].preset = "missing".into();
        let warnings = library.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unknown preset 'missing'"));
    }

    #[test]
    fn registries_look_up_by_name() {
        let store = JsonLibraryStore::new("unused.json", sample());
        assert!(store.preset("HEVC").is_some());
        assert!(store.preset("hevc").is_none());
        assert_eq!(
            store.filter("everything").map(|f| f.media_source),
            Some(MediaSource::Folder)
        );

        let mut replacement = Preset::new("HEVC", "libsvtav1");
        replacement.container = Some("matroska".into());
        store.upsert_preset(replacement);
        assert_eq!(store.presets().len(), 1);
        assert_eq!(
            store.preset("HEVC").map(|p| p.video_encoder),
            Some("libsvtav1".to_string())
        );
    }

    #[tokio::test]
    async fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.json");
        let store = JsonLibraryStore::open(&path).unwrap();
        assert_eq!(store.library(), Library::default());

        let library = sample();
        store.upsert_preset(library.presets[0].clone());
        store.upsert_filter(library.filters[0].clone());
        store.save_jobs(&library.jobs).await.unwrap();

        let reopened = JsonLibraryStore::open(&path).unwrap();
        assert_eq!(reopened.library(), library);
        assert_eq!(reopened.load_jobs().await.unwrap(), library.jobs);
    }

    #[tokio::test]
    async fn job_flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        let store = JsonLibraryStore::open(&path).unwrap();

        let job = Job::new("Movies", "everything", "HEVC")
            .with_auto_run(true)
            .with_auto_import(true);
        store.save_jobs(&[job.to_definition()]).await.unwrap();

        let reopened = JsonLibraryStore::open(&path).unwrap();
        let jobs = reopened.load_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        let restored = Job::from_definition(&jobs[0]);
        assert!(restored.auto_run());
        assert!(restored.auto_import());

        // Older documents without the flag load with it off.
        std::fs::write(
            &path,
            r#"{ "jobs": [{ "name": "Movies", "filter": "everything", "preset": "HEVC" }] }"#,
        )
        .unwrap();
        let legacy = JsonLibraryStore::open(&path).unwrap().load_jobs().await.unwrap();
        assert!(!legacy[0].auto_run);
    }
}
