//! Inline annotations for build warnings.
//!
//! Cross-references solve-status warnings against the Dockerfiles known
//! from local build state, producing GitHub-style file annotations.
//! Everything here is best-effort: a warning or build reference that
//! cannot be resolved is logged and skipped, never an error.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dockerbuild_core::config::Settings;
use dockerbuild_core::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::solve::VertexWarning;
use crate::state::{local_state, Ref};

/// Remote Dockerfiles are only trusted from this host.
const GITHUB_HOST: &str = "github.com";

/// A GitHub-style inline annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GitHubAnnotation {
    pub title: String,
    pub message: String,
    /// Dockerfile path relative to the workspace (or within the remote
    /// context for remote Dockerfiles).
    pub file: String,
    /// Start line of the warning's first source range. The annotation
    /// format cannot express multi-line ranges.
    #[serde(rename = "startLine", skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u64>,
}

/// Context for resolving warnings against the local checkout.
#[derive(Debug, Clone)]
pub struct AnnotationOptions {
    /// Local-state tree (`<buildx config>/refs`).
    pub refs_dir: PathBuf,
    /// Workspace root; local Dockerfiles must live inside it.
    pub workspace_dir: PathBuf,
    /// Current repository as `owner/name`.
    pub repository: Option<String>,
}

impl AnnotationOptions {
    /// Resolve from the environment (GitHub Actions variables).
    pub fn from_env() -> Self {
        let settings = Settings::from_env();
        Self {
            refs_dir: settings.refs_dir(),
            workspace_dir: settings.workspace_dir.clone(),
            repository: settings.repository,
        }
    }
}

/// A parsed git remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRemote {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl GitRemote {
    /// Parse a git remote URL.
    ///
    /// Supports `https://`, `http://`, `ssh://`, `git://` and scp-like
    /// `git@host:owner/repo` forms; a `.git` suffix and a `#fragment`
    /// are stripped.
    pub fn parse(remote: &str) -> Result<Self> {
        let remote = remote.trim();
        if remote.is_empty() {
            return Err(Error::Other("empty git remote".to_string()));
        }

        // scp-like: git@host:owner/repo.git
        if let Some(rest) = remote.strip_prefix("git@") {
            if let Some((host, path)) = rest.split_once(':') {
                return Self::from_host_path(host, path, remote);
            }
        }

        for scheme in ["https://", "http://", "ssh://", "git://"] {
            if let Some(rest) = remote.strip_prefix(scheme) {
                let (authority, path) = rest.split_once('/').ok_or_else(|| {
                    Error::Other(format!("git remote '{remote}' has no repository path"))
                })?;
                // Drop userinfo and port from the authority
                let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
                let host = host.split(':').next().unwrap_or(host);
                return Self::from_host_path(host, path, remote);
            }
        }

        Err(Error::Other(format!("'{remote}' is not a git remote URL")))
    }

    fn from_host_path(host: &str, path: &str, original: &str) -> Result<Self> {
        let path = path
            .split(['#', '?'])
            .next()
            .unwrap_or(path)
            .trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut components = path.split('/').filter(|c| !c.is_empty());
        match (components.next(), components.next()) {
            (Some(owner), Some(repo)) if !host.is_empty() => Ok(Self {
                host: host.to_string(),
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(Error::Other(format!(
                "git remote '{original}' has no owner/repository path"
            ))),
        }
    }
}

/// A Dockerfile known from local build state, for warning matching.
#[derive(Debug, Clone)]
enum KnownDockerfile {
    /// Remote build context: only the path is known, content cannot be
    /// compared, so every warning matches it.
    Remote { path: String },
    /// Local file: workspace-relative path plus base64 content.
    Local { path: String, content: String },
}

// Warning messages end with the location repeated, e.g. " (line 4)"
static LINE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\(line \d+\)$").unwrap());

/// Convert build warnings into GitHub-style annotations.
///
/// Returns `Ok(None)` when there are no warnings. Build references with
/// unresolvable local state and warnings that cannot be rendered or
/// matched are skipped with a debug log.
pub fn github_annotations(
    warnings: &[VertexWarning],
    build_refs: &[String],
    opts: &AnnotationOptions,
) -> Result<Option<Vec<GitHubAnnotation>>> {
    if warnings.is_empty() {
        return Ok(None);
    }

    let dockerfiles = known_dockerfiles(build_refs, opts);
    let mut annotations = Vec::new();

    for warning in warnings {
        let Some(annotation) = convert_warning(warning, &dockerfiles) else {
            continue;
        };
        annotations.push(annotation);
    }

    Ok(Some(annotations))
}

/// Resolve the Dockerfiles referenced by the given build refs.
fn known_dockerfiles(build_refs: &[String], opts: &AnnotationOptions) -> Vec<KnownDockerfile> {
    let mut dockerfiles = Vec::new();

    for reference in build_refs {
        let parsed = match Ref::parse(reference) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(reference = %reference, error = %e, "Skipping unparseable build ref");
                continue;
            }
        };
        let state = match local_state(&parsed, &opts.refs_dir) {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(reference = %reference, error = %e, "Skipping build ref without local state");
                continue;
            }
        };

        if state.dockerfile_path == "-" {
            tracing::debug!(reference = %reference, "Skipping stdin Dockerfile");
            continue;
        }

        if let Ok(remote) = GitRemote::parse(&state.local_path) {
            if remote_matches_repo(&remote, opts) {
                dockerfiles.push(KnownDockerfile::Remote {
                    path: state.dockerfile_path,
                });
            } else {
                tracing::debug!(
                    remote = %state.local_path,
                    "Skipping Dockerfile from a foreign remote context"
                );
            }
            continue;
        }

        let dockerfile_path = if Path::new(&state.dockerfile_path).is_absolute() {
            PathBuf::from(&state.dockerfile_path)
        } else {
            Path::new(&state.local_path).join(&state.dockerfile_path)
        };
        if !dockerfile_path.exists() {
            tracing::debug!(path = %dockerfile_path.display(), "Skipping missing Dockerfile");
            continue;
        }
        let relative = match dockerfile_path.strip_prefix(&opts.workspace_dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                tracing::debug!(
                    path = %dockerfile_path.display(),
                    workspace = %opts.workspace_dir.display(),
                    "Skipping Dockerfile outside the workspace"
                );
                continue;
            }
        };
        let content = match std::fs::read(&dockerfile_path) {
            Ok(content) => BASE64.encode(content),
            Err(e) => {
                tracing::debug!(path = %dockerfile_path.display(), error = %e, "Skipping unreadable Dockerfile");
                continue;
            }
        };
        dockerfiles.push(KnownDockerfile::Local {
            path: relative.display().to_string(),
            content,
        });
    }

    dockerfiles
}

fn remote_matches_repo(remote: &GitRemote, opts: &AnnotationOptions) -> bool {
    if !remote.host.eq_ignore_ascii_case(GITHUB_HOST) {
        return false;
    }
    match opts.repository.as_deref().and_then(|r| r.split_once('/')) {
        Some((owner, repo)) => {
            remote.owner.eq_ignore_ascii_case(owner) && remote.repo.eq_ignore_ascii_case(repo)
        }
        None => false,
    }
}

/// Convert one warning, or skip it when it cannot be rendered or matched.
fn convert_warning(
    warning: &VertexWarning,
    dockerfiles: &[KnownDockerfile],
) -> Option<GitHubAnnotation> {
    let short = warning.short.as_deref().filter(|s| !s.is_empty())?;
    if warning.detail.is_empty() {
        tracing::debug!("Skipping warning without detail text");
        return None;
    }
    let source = warning.source_info.as_ref()?;
    if source.filename.is_empty() || source.data.is_empty() {
        tracing::debug!("Skipping warning without source information");
        return None;
    }

    let title = decode_segments(&warning.detail)?.join(" ");
    let decoded_short = decode_text(short)?;
    let mut message = LINE_SUFFIX.replace(&decoded_short, "").into_owned();
    if let Some(url) = warning.url.as_deref().filter(|u| !u.is_empty()) {
        message.push_str("\nMore info: ");
        message.push_str(url);
    }

    let file = dockerfiles.iter().find_map(|known| match known {
        KnownDockerfile::Remote { path } => Some(path.clone()),
        KnownDockerfile::Local { path, content } => {
            (path.ends_with(&source.filename) && content == &source.data)
                .then(|| path.clone())
        }
    });
    let Some(file) = file else {
        tracing::debug!(
            filename = %source.filename,
            "Skipping warning matching no known Dockerfile"
        );
        return None;
    };

    Some(GitHubAnnotation {
        title,
        message,
        file,
        start_line: warning.range.first().map(|r| r.start.line),
    })
}

fn decode_text(encoded: &str) -> Option<String> {
    match BASE64.decode(encoded) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping warning with undecodable text");
            None
        }
    }
}

fn decode_segments(segments: &[String]) -> Option<Vec<String>> {
    segments.iter().map(|s| decode_text(s)).collect()
}
