//! Catalog service implementations.

pub mod folder;

pub use folder::{is_video_file, FolderCatalog, FolderEntry};
