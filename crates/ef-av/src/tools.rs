//! Locating the ffmpeg and ffprobe executables.
//!
//! The [`ToolRegistry`] resolves each tool once, preferring a configured
//! override path and falling back to a `PATH` lookup via [`which`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ef_core::config::ToolsConfig;
use ef_core::{Error, Result};
use serde::Serialize;

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

const KNOWN_TOOLS: &[&str] = &[FFMPEG, FFPROBE];

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if the tool ran.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolved tool paths.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools from configured overrides or `PATH`.
    ///
    /// An override that does not exist is logged and ignored.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let configured = match name {
                FFMPEG => config.ffmpeg_path.as_deref(),
                FFPROBE => config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match configured {
                Some(path) if path.exists() => Some(path.to_path_buf()),
                Some(path) => {
                    tracing::warn!(tool = name, path = %path.display(), "configured tool path does not exist; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "tool found");
                    tools.insert(name, path);
                }
                None => tracing::debug!(tool = name, "tool not found"),
            }
        }

        Self { tools }
    }

    /// A registry with explicit paths, skipping discovery.
    pub fn with_paths(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        let mut tools = HashMap::new();
        tools.insert(FFMPEG, ffmpeg);
        tools.insert(FFPROBE, ffprobe);
        Self { tools }
    }

    /// Path of a discovered tool, or [`Error::Configuration`] if missing.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| {
            Error::Configuration(format!("{name} not found; is it installed and in PATH?"))
        })
    }

    pub fn ffmpeg(&self) -> Result<&Path> {
        self.require(FFMPEG)
    }

    pub fn ffprobe(&self) -> Result<&Path> {
        self.require(FFPROBE)
    }

    /// Availability of every known tool, running `-version` on the found ones.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ffmpeg", "ffprobe"]);
    }

    #[test]
    fn missing_override_falls_back_without_panicking() {
        let config = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/definitely/not/here/ffmpeg")),
            ffprobe_path: None,
        };
        let registry = ToolRegistry::discover(&config);
        if let Ok(path) = registry.ffmpeg() {
            assert_ne!(path, Path::new("/definitely/not/here/ffmpeg"));
        }
    }

    #[test]
    fn require_unknown_tool_is_configuration_error() {
        let registry = ToolRegistry::default();
        assert_matches!(registry.require("mkvmerge"), Err(Error::Configuration(_)));
        assert_matches!(registry.ffprobe(), Err(Error::Configuration(_)));
    }

    #[test]
    fn explicit_paths() {
        let registry = ToolRegistry::with_paths("/opt/ff/ffmpeg".into(), "/opt/ff/ffprobe".into());
        assert_eq!(registry.ffmpeg().unwrap(), Path::new("/opt/ff/ffmpeg"));
        assert_eq!(registry.ffprobe().unwrap(), Path::new("/opt/ff/ffprobe"));
    }
}
