//! Dockerbuild History - build-record export and decoding.
//!
//! This crate drives the build tool's record-export pipeline and decodes
//! the resulting `.dockerbuild` archives: OCI archive decoding, build
//! record extraction, build-reference/local-state resolution, and
//! warning-to-annotation conversion for CI workflows.

pub mod annotations;
pub mod buildx;
pub mod export;
pub mod oci;
pub mod record;
pub mod solve;
pub mod state;
pub mod summary;

// Re-export common types
pub use annotations::{github_annotations, AnnotationOptions, GitHubAnnotation, GitRemote};
pub use buildx::{BuildxVersion, InspectResponse};
pub use export::{export, ExportOptions, ExportResult};
pub use oci::{load_archive, Archive};
pub use record::{read_record, read_records, BuildRecord};
pub use solve::{SolveStatus, VertexWarning};
pub use state::{fix_local_state, local_state, refs, LocalState, Ref, RefsOptions};
pub use summary::Summary;

/// Dockerbuild toolkit version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
