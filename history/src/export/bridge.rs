//! Named-pipe bridge to a builder's control plane.
//!
//! The legacy export path cannot hand the export tool a control socket
//! directly; instead two FIFOs carry the control-plane byte stream in
//! each direction between a `dial-stdio` child and the tool container.

use std::path::{Path, PathBuf};

use dockerbuild_core::error::{Error, Result};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

/// A pair of named pipes bridging stdio to a control plane.
///
/// Owns the pipe files on disk; both are removed on drop.
#[derive(Debug)]
pub struct FifoBridge {
    /// Control plane → export tool.
    from_control_plane: PathBuf,
    /// Export tool → control plane.
    to_control_plane: PathBuf,
}

impl FifoBridge {
    /// Create both pipes inside `dir`.
    ///
    /// Stale pipe files from an earlier run are replaced.
    pub fn create(dir: &Path) -> Result<Self> {
        let from_control_plane = dir.join("from-cp");
        let to_control_plane = dir.join("to-cp");

        for path in [&from_control_plane, &to_control_plane] {
            if path.exists() {
                std::fs::remove_file(path).ok();
            }
            mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| {
                Error::Export(format!(
                    "failed to create pipe {}: {e}",
                    path.display()
                ))
            })?;
        }

        tracing::debug!(dir = %dir.display(), "Created control-plane pipe bridge");

        Ok(Self {
            from_control_plane,
            to_control_plane,
        })
    }

    /// Pipe carrying control-plane output toward the export tool.
    pub fn from_control_plane(&self) -> &Path {
        &self.from_control_plane
    }

    /// Pipe carrying export-tool output toward the control plane.
    pub fn to_control_plane(&self) -> &Path {
        &self.to_control_plane
    }

    /// Open a pipe end read+write.
    ///
    /// A FIFO opened for one direction blocks until the peer opens the
    /// other; read+write never blocks, so the child can be spawned
    /// before the container attaches.
    pub fn open_rw(path: &Path) -> Result<std::fs::File> {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                Error::Export(format!("failed to open pipe {}: {e}", path.display()))
            })
    }
}

impl Drop for FifoBridge {
    fn drop(&mut self) {
        std::fs::remove_file(&self.from_control_plane).ok();
        std::fs::remove_file(&self.to_control_plane).ok();
    }
}
