//! OCI archive support for exported build records.
//!
//! A `.dockerbuild` file is a gzip-compressed tar laid out per the OCI
//! Image Layout spec:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     .dockerbuild archive                     │
//! │                                                              │
//! │  ├── oci-layout           (layout version marker)           │
//! │  ├── index.json           (root image index)                │
//! │  └── blobs/                                                 │
//! │      └── sha256/                                            │
//! │          ├── <index>      (nested indexes, multi-ref)       │
//! │          ├── <manifest>   (one per build record)            │
//! │          ├── <config>     (history-record JSON)             │
//! │          └── <layers>     (solve status, provenance, logs)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod archive;

pub use archive::{load_archive, Archive, ArchiveRoot, ImageLayout};

/// OCI image index media type.
pub const MEDIATYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Docker manifest list media type (legacy equivalent of the OCI index).
pub const MEDIATYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest media type.
pub const MEDIATYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker image manifest media type.
pub const MEDIATYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of a build history-record config blob.
pub const MEDIATYPE_HISTORY_RECORD: &str = "application/vnd.buildkit.historyrecord.v0";

/// Media type of a solve-status layer.
pub const MEDIATYPE_SOLVE_STATUS: &str = "application/vnd.buildkit.solvestatus.v0";

/// Media type of an in-toto attestation payload layer.
pub const MEDIATYPE_INTOTO_PAYLOAD: &str = "application/vnd.in-toto+json";

/// Manifest annotation carrying the build reference of a record.
pub const ANNOTATION_RECORD_REF: &str = "vnd.buildkit.historyrecord.ref";

/// Layer annotation naming the in-toto predicate type.
pub const ANNOTATION_PREDICATE_TYPE: &str = "in-toto.io/predicate-type";

/// SLSA provenance predicates share this URI prefix.
pub const SLSA_PROVENANCE_PREFIX: &str = "https://slsa.dev/provenance/";

/// Whether a media-type string names an image index (OCI or Docker form).
pub(crate) fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIATYPE_IMAGE_INDEX || media_type == MEDIATYPE_DOCKER_MANIFEST_LIST
}

/// Whether a media-type string names an image manifest (OCI or Docker form).
pub(crate) fn is_manifest_media_type(media_type: &str) -> bool {
    media_type == MEDIATYPE_IMAGE_MANIFEST || media_type == MEDIATYPE_DOCKER_MANIFEST
}
