//! Dockerbuild Toolkit Core - Foundational Types
//!
//! This module provides the error type, environment-driven settings and
//! logging bootstrap shared across the dockerbuild toolkit crates.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{Settings, DEFAULT_EXPORT_IMAGE};
pub use error::{Error, Result};

/// Dockerbuild toolkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
