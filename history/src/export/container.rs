//! FIFO-bridged export through the export-tool container.
//!
//! Fallback strategy for buildx versions without a native export
//! subcommand: a `dial-stdio` child exposes the builder's control plane
//! over a pipe pair, and the export tool runs as a container with the
//! pipes, the local-state tree and the output directory mounted.

use std::path::Path;
use std::process::Stdio;

use dockerbuild_core::error::{Error, Result};
use nix::unistd::{Gid, Uid};

use super::bridge::FifoBridge;
use super::EXPORT_FILENAME;
use crate::buildx;

/// Mount point of the local-state tree inside the tool container.
const MOUNT_REFS: &str = "/buildx-refs";

/// Mount point of the shared output directory.
const MOUNT_OUT: &str = "/out";

/// Mount points of the two bridge pipes.
const MOUNT_FROM_CP: &str = "/run/bridge/from-cp";
const MOUNT_TO_CP: &str = "/run/bridge/to-cp";

/// One bridged export request.
#[derive(Debug)]
pub(crate) struct ContainerExport<'a> {
    pub image: &'a str,
    pub builder: &'a str,
    pub node: &'a str,
    pub ids: &'a [String],
    pub refs_dir: &'a Path,
    /// Scratch directory: holds the pipes and receives the tool's output.
    pub scratch_dir: &'a Path,
}

/// Run the export tool against a bridged control plane.
///
/// The dial-stdio child is a service process: its stdin is opened
/// read+write so it never sees EOF, and it is force-killed once the
/// tool exits, successfully or not.
pub(crate) async fn export_via_container(request: &ContainerExport<'_>) -> Result<()> {
    let bridge = FifoBridge::create(request.scratch_dir)?;

    let dial_stdin = FifoBridge::open_rw(bridge.to_control_plane())?;
    let dial_stdout = FifoBridge::open_rw(bridge.from_control_plane())?;
    let mut dial = buildx::dial_stdio_command(request.builder);
    dial.stdin(Stdio::from(dial_stdin))
        .stdout(Stdio::from(dial_stdout))
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut dial_child = dial
        .spawn()
        .map_err(|e| Error::Export(format!("failed to spawn dial-stdio bridge: {e}")))?;
    tracing::debug!(
        pid = dial_child.id(),
        builder = request.builder,
        "Control-plane bridge started"
    );

    let mut tool = tool_command(request, &bridge);
    let tool_result = buildx::run_output(&mut tool).await;

    // Stop the bridge child before looking at the tool's result
    let _ = dial_child.start_kill();
    let _ = dial_child.wait().await;
    tracing::debug!("Control-plane bridge stopped");

    tool_result.map_err(|e| match e {
        Error::Subprocess { code, stderr, .. } => Error::Export(format!(
            "export tool exited with code {code}: {stderr}"
        )),
        other => other,
    })?;

    wait_for_file(&request.scratch_dir.join(EXPORT_FILENAME)).await
}

/// Assemble the `docker run` invocation for the export tool.
fn tool_command(request: &ContainerExport<'_>, bridge: &FifoBridge) -> tokio::process::Command {
    let mut tool = tokio::process::Command::new("docker");
    tool.args(["run", "--rm", "-i"]);
    tool.arg("-v")
        .arg(format!("{}:{MOUNT_REFS}:ro", request.refs_dir.display()));
    tool.arg("-v")
        .arg(format!("{}:{MOUNT_OUT}", request.scratch_dir.display()));
    tool.arg("-v").arg(format!(
        "{}:{MOUNT_FROM_CP}",
        bridge.from_control_plane().display()
    ));
    tool.arg("-v").arg(format!(
        "{}:{MOUNT_TO_CP}",
        bridge.to_control_plane().display()
    ));
    tool.arg(request.image);
    tool.arg(format!("--ref-state-dir={MOUNT_REFS}"));
    tool.arg(format!("--node={}/{}", request.builder, request.node));
    for id in request.ids {
        tool.arg(format!("--ref={id}"));
    }
    tool.arg(format!("--uid={}", Uid::current()));
    tool.arg(format!("--gid={}", Gid::current()));
    tool.kill_on_drop(true);
    tool
}

/// Wait for the tool's output file to appear.
async fn wait_for_file(path: &Path) -> Result<()> {
    let max_attempts = 50; // 5 seconds total
    for _ in 0..max_attempts {
        if path.exists() {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    Err(Error::Export(format!(
        "export tool exited without producing {}",
        path.display()
    )))
}
