//! Environment-driven settings for the toolkit.
//!
//! CI runners configure the toolkit entirely through environment
//! variables; `Settings::from_env` snapshots them once per operation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default export-tool container image, used when no override is set.
pub const DEFAULT_EXPORT_IMAGE: &str = "docker.io/dockereng/export-build:latest";

/// Environment variable selecting an alternate export-tool image.
pub const ENV_EXPORT_IMAGE: &str = "BUILDX_EXPORT_IMAGE";

/// Environment variable overriding the buildx config directory.
pub const ENV_BUILDX_CONFIG: &str = "BUILDX_CONFIG";

/// Toolkit settings resolved from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Buildx configuration directory (holds the `refs` local-state tree).
    pub buildx_config_dir: PathBuf,

    /// Export-tool container image reference.
    pub export_image: String,

    /// Current repository as `owner/name`, when running under GitHub Actions.
    pub repository: Option<String>,

    /// Workspace root directory for Dockerfile containment checks.
    pub workspace_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buildx_config_dir: default_buildx_config_dir(),
            export_image: DEFAULT_EXPORT_IMAGE.to_string(),
            repository: None,
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// Reads `BUILDX_CONFIG`, `BUILDX_EXPORT_IMAGE`, `GITHUB_REPOSITORY`
    /// and `GITHUB_WORKSPACE`, falling back to defaults for each.
    pub fn from_env() -> Self {
        let buildx_config_dir = std::env::var_os(ENV_BUILDX_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(default_buildx_config_dir);

        let export_image = std::env::var(ENV_EXPORT_IMAGE)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EXPORT_IMAGE.to_string());

        let repository = std::env::var("GITHUB_REPOSITORY")
            .ok()
            .filter(|s| s.contains('/'));

        let workspace_dir = std::env::var_os("GITHUB_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Self {
            buildx_config_dir,
            export_image,
            repository,
            workspace_dir,
        }
    }

    /// Directory holding per-build local state (`<config>/refs`).
    pub fn refs_dir(&self) -> PathBuf {
        self.buildx_config_dir.join("refs")
    }

    /// Repository owner and name, when known.
    pub fn repo_owner_name(&self) -> Option<(&str, &str)> {
        self.repository
            .as_deref()
            .and_then(|r| r.split_once('/'))
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
    }
}

/// Default buildx config directory: `~/.docker/buildx`.
fn default_buildx_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docker")
        .join("buildx")
}
