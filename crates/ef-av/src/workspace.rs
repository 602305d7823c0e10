//! Scratch directory for intermediate encoder files.
//!
//! A [`Workspace`] owns a temporary directory that is removed when the
//! workspace is dropped, whichever way the owning operation ends.

use std::path::{Path, PathBuf};

use ef_core::{Error, Result};
use tempfile::TempDir;

pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("encodeforge-")
            .tempdir()
            .map_err(|e| {
                Error::filesystem(&std::env::temp_dir(), format!("failed to create temp dir: {e}"))
            })?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path for a named file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.temp_dir.path())
            .finish()
    }
}
