//! Build references and on-disk local state.
//!
//! The build tool records one local-state JSON file per build under
//! `<refs>/<builder>/<node>/<id>`. References name that location as a
//! `builder/node/id` triple.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dockerbuild_core::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Reserved directory for build-group state, never a node directory.
const GROUP_DIR: &str = "__group__";

/// A parsed build reference: `builder/node/id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub builder: String,
    pub node: String,
    pub id: String,
}

impl Ref {
    /// Parse a `builder/node/id` reference.
    ///
    /// Fails unless the string splits into exactly three non-empty
    /// components.
    pub fn parse(reference: &str) -> Result<Self> {
        let parts: Vec<&str> = reference.split('/').collect();
        match parts.as_slice() {
            [builder, node, id]
                if !builder.is_empty() && !node.is_empty() && !id.is_empty() =>
            {
                Ok(Self {
                    builder: builder.to_string(),
                    node: node.to_string(),
                    id: id.to_string(),
                })
            }
            _ => Err(Error::InvalidRef(reference.to_string())),
        }
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.builder, self.node, self.id)
    }
}

/// Local state stored for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    /// Build target name.
    #[serde(rename = "Target", default)]
    pub target: String,

    /// Build context: a directory, a remote URL, or `-` for stdin.
    #[serde(rename = "LocalPath", default)]
    pub local_path: String,

    /// Dockerfile path within the context, or `-` for stdin.
    #[serde(rename = "DockerfilePath", default)]
    pub dockerfile_path: String,

    /// Group reference when the build was part of a bake group.
    #[serde(rename = "GroupRef", default, skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
}

/// Options for enumerating stored local state.
#[derive(Debug, Clone, Default)]
pub struct RefsOptions {
    /// Restrict to one builder directory.
    pub builder_name: Option<String>,
    /// Restrict to one node directory.
    pub node_name: Option<String>,
    /// Skip state files last modified before this instant.
    pub since: Option<DateTime<Utc>>,
}

// Older build tools serialized remote contexts with the checkout path
// glued in front of the URL, occasionally dropping one scheme slash.
static EMBEDDED_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(https?|ssh|git):/{1,2}(.*)$").unwrap());

/// Repair a local state entry written by a buggy serializer.
///
/// Extracts a URL embedded in `LocalPath` (restoring a dropped scheme
/// slash), strips the glued-on prefix from `DockerfilePath` when the two
/// share it, and collapses a trailing `/-` stdin marker on either field
/// to bare `-`. Applying the fix twice gives the same result as once.
pub fn fix_local_state(mut state: LocalState) -> LocalState {
    if let Some(captures) = EMBEDDED_URL.captures(&state.local_path) {
        let prefix = captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let scheme = &captures[2];
        let rest = &captures[3];
        state.local_path = format!("{scheme}://{rest}");
        if !prefix.is_empty() {
            if let Some(stripped) = state.dockerfile_path.strip_prefix(&prefix) {
                state.dockerfile_path = stripped.to_string();
            }
        }
    }
    for field in [&mut state.local_path, &mut state.dockerfile_path] {
        if field.ends_with("/-") {
            *field = "-".to_string();
        }
    }
    state
}

/// Path of the local-state file for a reference.
fn state_path(base_dir: &Path, reference: &Ref) -> PathBuf {
    base_dir
        .join(&reference.builder)
        .join(&reference.node)
        .join(&reference.id)
}

/// Read the local state for one build reference.
///
/// State is read fresh from disk on every call; there is no caching.
///
/// # Errors
///
/// Returns [`Error::LocalStateNotFound`] when no state file exists for
/// the reference, and a serialization error when the file is not valid
/// local-state JSON.
pub fn local_state(reference: &Ref, base_dir: &Path) -> Result<LocalState> {
    let path = state_path(base_dir, reference);
    if !path.exists() {
        return Err(Error::LocalStateNotFound {
            reference: reference.to_string(),
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Other(format!(
            "failed to read local state at {}: {}",
            path.display(),
            e
        ))
    })?;
    let state: LocalState = serde_json::from_str(&content)?;
    Ok(fix_local_state(state))
}

/// Enumerate stored local state across the refs tree.
///
/// Descends `<dir>/<builder>/<node>/<id>`, skipping the reserved group
/// directory, applying the fix-up to every leaf and filtering by
/// modification time when `since` is set.
pub fn refs(dir: &Path, opts: &RefsOptions) -> Result<BTreeMap<String, LocalState>> {
    let mut found = BTreeMap::new();
    if !dir.exists() {
        return Ok(found);
    }

    for builder_entry in std::fs::read_dir(dir)? {
        let builder_entry = builder_entry?;
        if !builder_entry.file_type()?.is_dir() {
            continue;
        }
        let builder = builder_entry.file_name().to_string_lossy().into_owned();
        if let Some(ref only) = opts.builder_name {
            if &builder != only {
                continue;
            }
        }

        for node_entry in std::fs::read_dir(builder_entry.path())? {
            let node_entry = node_entry?;
            if !node_entry.file_type()?.is_dir() {
                continue;
            }
            let node = node_entry.file_name().to_string_lossy().into_owned();
            if node == GROUP_DIR {
                continue;
            }
            if let Some(ref only) = opts.node_name {
                if &node != only {
                    continue;
                }
            }

            for leaf in std::fs::read_dir(node_entry.path())? {
                let leaf = leaf?;
                if !leaf.file_type()?.is_file() {
                    continue;
                }
                if let Some(since) = opts.since {
                    let modified = leaf.metadata()?.modified()?;
                    if DateTime::<Utc>::from(modified) < since {
                        continue;
                    }
                }
                let id = leaf.file_name().to_string_lossy().into_owned();
                let content = std::fs::read_to_string(leaf.path())?;
                let state: LocalState = match serde_json::from_str(&content) {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::warn!(
                            path = %leaf.path().display(),
                            error = %e,
                            "Skipping unreadable local state file"
                        );
                        continue;
                    }
                };
                found.insert(
                    format!("{builder}/{node}/{id}"),
                    fix_local_state(state),
                );
            }
        }
    }

    Ok(found)
}
