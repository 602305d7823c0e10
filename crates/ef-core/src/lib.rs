//! ef-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other ef-* crates,
//! providing the unified error type, typed identifiers, the probed media
//! model, application configuration, and a broadcast event bus used as the
//! best-effort notification channel.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
