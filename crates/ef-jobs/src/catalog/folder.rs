//! A catalog backed by a plain directory tree.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use ef_core::{Error, MediaSource, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::collaborators::{CatalogService, FilterDefinition, MediaEntry};
use crate::work_item::WorkItem;

/// Extensions listed by the folder catalog.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "ts", "m2ts", "webm", "mov", "wmv", "flv", "mpg", "mpeg",
];

/// Check if a path has a video file extension.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A file found under the catalog root.
#[derive(Debug, Clone)]
pub struct FolderEntry {
    path: PathBuf,
    hash: String,
}

impl MediaEntry for FolderEntry {
    fn stable_hash(&self) -> String {
        self.hash.clone()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Lists video files below `root` whose path matches the filter's query,
/// read as a regular expression. An empty query selects everything.
#[derive(Debug, Clone)]
pub struct FolderCatalog {
    root: PathBuf,
}

impl FolderCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CatalogService for FolderCatalog {
    fn source(&self) -> MediaSource {
        MediaSource::Folder
    }

    async fn test_connection(&self) -> Result<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::connectivity(
                "folder",
                format!("{} is not a directory", self.root.display()),
            )),
            Err(e) => Err(Error::connectivity(
                "folder",
                format!("{}: {e}", self.root.display()),
            )),
        }
    }

    async fn list_files(&self, filter: &FilterDefinition) -> Result<Vec<Box<dyn MediaEntry>>> {
        let pattern = if filter.query.trim().is_empty() {
            None
        } else {
            Some(Regex::new(&filter.query).map_err(|e| {
                Error::Configuration(format!("filter '{}' has an invalid pattern: {e}", filter.name))
            })?)
        };

        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || scan(&root, pattern.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("folder scan task failed: {e}")))??;

        tracing::debug!(
            root = %self.root.display(),
            filter = %filter.name,
            count = entries.len(),
            "folder listed"
        );
        Ok(entries
            .into_iter()
            .map(|e| Box::new(e) as Box<dyn MediaEntry>)
            .collect())
    }

    async fn import(&self, item: &WorkItem) -> Result<()> {
        tracing::info!(
            destination = %item.destination.display(),
            "folder catalog has nothing to import into"
        );
        Ok(())
    }
}

fn scan(root: &Path, pattern: Option<&Regex>) -> Result<Vec<FolderEntry>> {
    let root = root
        .canonicalize()
        .map_err(|e| Error::connectivity("folder", format!("{}: {e}", root.display())))?;

    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(&root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Error walking directory");
                None
            }
        })
    {
        if !entry.file_type().is_file() || !is_video_file(entry.path()) {
            continue;
        }
        let path = entry.path();
        if let Some(re) = pattern {
            if !re.is_match(&path.to_string_lossy()) {
                continue;
            }
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Cannot stat file, skipping");
                continue;
            }
        };
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        entries.push(FolderEntry {
            hash: content_hash(path, meta.len(), modified),
            path: path.to_path_buf(),
        });
    }
    Ok(entries)
}

/// Hash of size, modification time and path.
fn content_hash(path: &Path, size: u64, modified: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());
    hasher.update(modified.to_le_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}
