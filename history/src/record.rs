//! Build-record extraction from decoded archives.
//!
//! Walks an archive's index tree and recovers one [`BuildRecord`] per
//! manifest, cross-checking every digest and annotation on the way.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use dockerbuild_core::error::{Error, Result};
use oci_spec::image::{Descriptor, ImageIndex};
use serde::{Deserialize, Serialize};

use crate::oci::{
    is_index_media_type, is_manifest_media_type, Archive, ANNOTATION_PREDICATE_TYPE,
    ANNOTATION_RECORD_REF, MEDIATYPE_HISTORY_RECORD, MEDIATYPE_INTOTO_PAYLOAD,
    MEDIATYPE_SOLVE_STATUS, SLSA_PROVENANCE_PREFIX,
};
use crate::solve::SolveStatus;

/// Error recorded on a failed build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    #[serde(rename = "Code", default)]
    pub code: i32,
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// One exported build record.
///
/// The base fields come from the history-record config blob; the solve
/// status and provenance are attached from the manifest's layers.
/// Constructed once per manifest and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Build reference id this record describes.
    #[serde(rename = "Ref")]
    pub reference: String,

    /// Frontend used for the build (e.g. `dockerfile.v0`).
    #[serde(rename = "Frontend", default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,

    /// Frontend attributes (build args, filename, target, ...).
    #[serde(
        rename = "FrontendAttrs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_attrs: Option<HashMap<String, String>>,

    #[serde(rename = "CreatedAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(
        rename = "CompletedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,

    #[serde(rename = "NumCachedSteps", default)]
    pub num_cached_steps: u64,

    #[serde(rename = "NumTotalSteps", default)]
    pub num_total_steps: u64,

    #[serde(rename = "NumCompletedSteps", default)]
    pub num_completed_steps: u64,

    /// Record fields this toolkit does not model, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Solve status, when the manifest carries a solve-status layer.
    #[serde(
        rename = "solveStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub solve_status: Option<SolveStatus>,

    /// SLSA provenance, when the manifest carries a matching in-toto layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<serde_json::Value>,
}

/// Recover every build record reachable from an index.
///
/// Nested indexes are resolved through `archive.indexes` and their
/// records merged into the result, keyed by each record's own reference.
/// A duplicate reference across indexes overwrites the earlier record;
/// well-formed archives do not produce duplicates.
pub fn read_records(
    index: &ImageIndex,
    archive: &Archive,
) -> Result<BTreeMap<String, BuildRecord>> {
    let mut records = BTreeMap::new();

    for descriptor in index.manifests() {
        let media_type = descriptor.media_type().to_string();
        if is_index_media_type(&media_type) {
            let nested = archive
                .indexes
                .get(descriptor.digest().as_str())
                .ok_or_else(|| {
                    Error::Record(format!("missing index {}", descriptor.digest()))
                })?;
            for (reference, record) in read_records(nested, archive)? {
                if records.insert(reference.clone(), record).is_some() {
                    tracing::debug!(
                        reference = %reference,
                        "duplicate build reference across indexes, keeping the later record"
                    );
                }
            }
        } else if is_manifest_media_type(&media_type) {
            let record = read_record(descriptor, archive)?;
            records.insert(record.reference.clone(), record);
        }
    }

    Ok(records)
}

/// Resolve a single manifest descriptor into a [`BuildRecord`].
///
/// # Errors
///
/// Returns [`Error::Record`] if the manifest or its config blob is
/// missing, if the config media type is not the history-record type, or
/// if the manifest's ref annotation disagrees with the record payload.
pub fn read_record(descriptor: &Descriptor, archive: &Archive) -> Result<BuildRecord> {
    let digest = descriptor.digest().as_str();
    let manifest = archive
        .manifests
        .get(digest)
        .ok_or_else(|| Error::Record(format!("missing manifest {digest}")))?;

    let config = manifest.config();
    let config_media_type = config.media_type().to_string();
    if config_media_type != MEDIATYPE_HISTORY_RECORD {
        return Err(Error::Record(format!(
            "manifest {digest} config has media type '{config_media_type}', expected '{MEDIATYPE_HISTORY_RECORD}'"
        )));
    }

    let config_blob = archive
        .blobs
        .get(config.digest().as_str())
        .ok_or_else(|| Error::Record(format!("missing config blob {}", config.digest())))?;
    let mut record: BuildRecord = serde_json::from_slice(config_blob).map_err(|e| {
        Error::Record(format!("invalid history record {}: {e}", config.digest()))
    })?;

    // Consistency check between navigation metadata and payload
    if let Some(annotations) = manifest.annotations() {
        if let Some(annotated) = annotations.get(ANNOTATION_RECORD_REF) {
            if annotated != &record.reference {
                return Err(Error::Record(format!(
                    "manifest {digest} is annotated for ref '{annotated}' but its record claims '{}'",
                    record.reference
                )));
            }
        }
    }

    for layer in manifest.layers() {
        let layer_media_type = layer.media_type().to_string();
        if layer_media_type == MEDIATYPE_SOLVE_STATUS {
            let blob = archive
                .blobs
                .get(layer.digest().as_str())
                .ok_or_else(|| {
                    Error::Record(format!("missing solve-status blob {}", layer.digest()))
                })?;
            let status: SolveStatus = serde_json::from_slice(blob).map_err(|e| {
                Error::Record(format!("invalid solve status {}: {e}", layer.digest()))
            })?;
            record.solve_status = Some(status);
        } else if layer_media_type == MEDIATYPE_INTOTO_PAYLOAD {
            let is_provenance = layer
                .annotations()
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_PREDICATE_TYPE))
                .is_some_and(|p| p.starts_with(SLSA_PROVENANCE_PREFIX));
            if is_provenance {
                let blob = archive
                    .blobs
                    .get(layer.digest().as_str())
                    .ok_or_else(|| {
                        Error::Record(format!(
                            "missing provenance blob {}",
                            layer.digest()
                        ))
                    })?;
                record.provenance = Some(serde_json::from_slice(blob).map_err(|e| {
                    Error::Record(format!("invalid provenance {}: {e}", layer.digest()))
                })?);
            }
        }
        // other layer media types (logs, traces) are not modeled
    }

    Ok(record)
}
