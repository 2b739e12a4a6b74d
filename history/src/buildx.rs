//! Build-tool CLI probing and invocation.
//!
//! Thin wrappers over the `docker` / `docker buildx` command line:
//! availability and version checks plus the history subcommands the
//! export pipeline drives.

use std::path::Path;

use chrono::{DateTime, Utc};
use dockerbuild_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Oldest buildx able to export build records at all.
pub const MIN_VERSION: &str = "0.13.0";

/// First buildx with a native `history export` subcommand.
pub(crate) const NATIVE_EXPORT_VERSION: (u64, u64) = (0, 24);

/// Parsed buildx version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildxVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Version token as printed, without the `v` prefix.
    pub raw: String,
}

impl BuildxVersion {
    /// Parse the output of `docker buildx version`.
    ///
    /// Accepts lines like `github.com/docker/buildx v0.24.0 1a2b3c4`,
    /// tolerating pre-release and `-desktop` suffixes.
    pub fn parse(output: &str) -> Result<Self> {
        for token in output.split_whitespace() {
            let candidate = token.strip_prefix('v').unwrap_or(token);
            if let Some(version) = Self::parse_triple(candidate) {
                return Ok(version);
            }
        }
        Err(Error::Other(format!(
            "unrecognized buildx version output: '{}'",
            output.trim()
        )))
    }

    fn parse_triple(s: &str) -> Option<Self> {
        let core = s.split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts
            .next()
            .map(|p| p.parse().ok())
            .unwrap_or(Some(0))?;
        Some(Self {
            major,
            minor,
            patch,
            raw: s.to_string(),
        })
    }

    /// Whether this version is at least `major.minor`.
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for BuildxVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Response of `docker buildx history inspect --format json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectResponse {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Ref", default)]
    pub reference: String,

    /// One of `completed`, `running`, `failed`, `canceled`.
    #[serde(rename = "Status", default)]
    pub status: String,

    #[serde(rename = "CreatedAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(
        rename = "CompletedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(rename = "NumCompletedSteps", default)]
    pub num_completed_steps: u64,

    #[serde(rename = "NumTotalSteps", default)]
    pub num_total_steps: u64,

    #[serde(rename = "NumCachedSteps", default)]
    pub num_cached_steps: u64,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InspectError>,

    #[serde(rename = "Platform", default, skip_serializing_if = "Vec::is_empty")]
    pub platform: Vec<String>,
}

/// Error block of an inspect response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectError {
    #[serde(rename = "Message", default)]
    pub message: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Logs", default)]
    pub logs: Vec<String>,
}

/// Check that a docker CLI (and daemon) is reachable.
pub async fn docker_available() -> Result<()> {
    let mut command = Command::new("docker");
    command.arg("version");
    match command.output().await {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(Error::RuntimeUnavailable(format!(
            "'docker version' exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) => Err(Error::RuntimeUnavailable(format!(
            "failed to run docker: {e} (is docker installed?)"
        ))),
    }
}

/// Probe the installed buildx version.
pub async fn version() -> Result<BuildxVersion> {
    let mut command = Command::new("docker");
    command.args(["buildx", "version"]);
    let output = run_output(&mut command).await?;
    BuildxVersion::parse(&String::from_utf8_lossy(&output.stdout))
}

/// Inspect one build record by id.
pub async fn inspect(builder: &str, id: &str) -> Result<InspectResponse> {
    let mut command = Command::new("docker");
    command.args([
        "buildx", "history", "inspect", "--format", "json", "--builder", builder, id,
    ]);
    let output = run_output(&mut command).await?;
    let response: InspectResponse = serde_json::from_slice(&output.stdout)?;
    Ok(response)
}

/// Build the native `history export` invocation.
pub(crate) fn history_export_command(
    builder: &str,
    ids: &[String],
    output: &Path,
    finalize: bool,
) -> Command {
    let mut command = Command::new("docker");
    command.args(["buildx", "history", "export", "--builder", builder]);
    command.arg("--output").arg(output);
    if finalize {
        command.arg("--finalize");
    }
    for id in ids {
        command.arg(id);
    }
    command
}

/// Build the `dial-stdio` invocation bridging to a builder's control plane.
pub(crate) fn dial_stdio_command(builder: &str) -> Command {
    let mut command = Command::new("docker");
    command.args(["buildx", "--builder", builder, "dial-stdio"]);
    command
}

/// Run a command to completion, failing on a non-zero exit.
///
/// The error carries the rendered command line and trimmed stderr.
pub(crate) async fn run_output(command: &mut Command) -> Result<std::process::Output> {
    let rendered = render_command(command.as_std());
    let output = command
        .output()
        .await
        .map_err(|e| Error::Other(format!("failed to run '{rendered}': {e}")))?;
    if !output.status.success() {
        return Err(Error::Subprocess {
            command: rendered,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Render a command line for error messages.
fn render_command(command: &std::process::Command) -> String {
    let mut rendered = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
