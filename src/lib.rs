//! encodeforge - media library transcoding automation.
//!
//! This library crate exposes the application wiring for the binary and for
//! integration testing.

pub mod app;

pub use app::App;
