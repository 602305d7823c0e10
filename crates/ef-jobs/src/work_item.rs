//! One source file within a job.

use std::path::{Path, PathBuf};

use ef_av::{EncoderArguments, OptionTrials};
use ef_core::{MediaInfo, WorkItemId};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub source_path: PathBuf,
    /// Identifies the source's contents; used as the probe cache key.
    pub content_hash: String,
    /// Filled by the catalog or, later, by the media-info loader.
    pub media_info: Option<MediaInfo>,
    pub destination: PathBuf,
    /// `None` until metadata is available to synthesize from.
    pub arguments: Option<EncoderArguments>,
    pub success: bool,
    /// Encode progress of the current pass, 0-100.
    pub progress: f32,
    pub trials: Vec<OptionTrials>,
}

impl WorkItem {
    pub fn new(source_path: PathBuf, content_hash: String, destination: PathBuf) -> Self {
        Self {
            id: WorkItemId::new(),
            source_path,
            content_hash,
            media_info: None,
            destination,
            arguments: None,
            success: false,
            progress: 0.0,
            trials: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn destination_dir(&self) -> Option<&Path> {
        self.destination.parent()
    }

    /// Ready to encode: probed and synthesized.
    pub fn is_ready(&self) -> bool {
        self.media_info.is_some() && self.arguments.is_some()
    }
}
