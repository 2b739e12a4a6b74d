//! Streaming decoder for exported build-record archives.
//!
//! Decodes a gzip-compressed OCI layout tar into an in-memory [`Archive`]
//! in a single pass over the stream, classifying every blob as it arrives.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use dockerbuild_core::error::{Error, Result};
use flate2::read::GzDecoder;
use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use serde::{Deserialize, Serialize};

use super::{is_index_media_type, is_manifest_media_type};

/// Parse cap for the root index entry. An index past this size is not a
/// plausible build-record archive and would buffer unbounded memory.
const MAX_INDEX_JSON_SIZE: u64 = 2 * 1024 * 1024;

/// OCI layout version marker (`oci-layout` file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageLayout {
    #[serde(rename = "imageLayoutVersion")]
    pub image_layout_version: String,
}

/// Root entries of a decoded archive.
#[derive(Debug)]
pub struct ArchiveRoot {
    /// Root image index (`index.json`).
    pub index: ImageIndex,
    /// Layout version marker (`oci-layout`).
    pub layout: ImageLayout,
}

/// A fully decoded build-record archive.
///
/// All maps are keyed by `<algorithm>:<hex>` digest strings. Every digest
/// lives in exactly one map; cross-references between manifests and their
/// config/layer blobs are verified at decode time.
#[derive(Debug)]
pub struct Archive {
    pub root: ArchiveRoot,
    pub indexes: BTreeMap<String, ImageIndex>,
    pub manifests: BTreeMap<String, ImageManifest>,
    pub images: BTreeMap<String, ImageConfiguration>,
    pub blobs: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    /// Whether any map holds content for the given digest.
    pub fn contains_digest(&self, digest: &str) -> bool {
        self.indexes.contains_key(digest)
            || self.manifests.contains_key(digest)
            || self.images.contains_key(digest)
            || self.blobs.contains_key(digest)
    }
}

/// What a sniffed blob turned out to be.
enum BlobKind {
    Index(ImageIndex),
    Manifest(ImageManifest),
    Image(Box<ImageConfiguration>),
    Opaque(Vec<u8>),
}

/// Load a `.dockerbuild` archive from disk.
///
/// Streams the gzip-wrapped tar entry by entry; each entry is fully
/// consumed before the next is opened.
///
/// # Errors
///
/// Returns [`Error::Archive`] if:
/// - The stream is not a gzip-wrapped tar
/// - The root `index.json` or `oci-layout` entry is absent or malformed
/// - The root index exceeds the parse size cap
/// - An entry path is neither a root file nor `blobs/<algo>/<hex>`
/// - A manifest references a digest the archive does not contain
pub fn load_archive(path: &Path) -> Result<Archive> {
    let file = std::fs::File::open(path).map_err(|e| {
        Error::Archive(format!("failed to open {}: {}", path.display(), e))
    })?;
    let decoder = GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);

    let mut root_index: Option<ImageIndex> = None;
    let mut root_layout: Option<ImageLayout> = None;
    let mut indexes = BTreeMap::new();
    let mut manifests = BTreeMap::new();
    let mut images = BTreeMap::new();
    let mut blobs = BTreeMap::new();

    let entries = tar
        .entries()
        .map_err(|e| Error::Archive(format!("not a gzip-wrapped tar stream: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Archive(format!("corrupt tar stream: {e}")))?;
        let name = {
            let entry_path = entry
                .path()
                .map_err(|e| Error::Archive(format!("unreadable entry path: {e}")))?;
            let raw = entry_path.to_string_lossy();
            raw.strip_prefix("./").unwrap_or(&raw).to_string()
        };

        match name.as_str() {
            "index.json" => {
                let size = entry.size();
                if size > MAX_INDEX_JSON_SIZE {
                    return Err(Error::Archive(format!(
                        "index.json is {size} bytes, exceeding the {MAX_INDEX_JSON_SIZE} byte limit"
                    )));
                }
                let data = read_entry(&mut entry, &name)?;
                let index: ImageIndex = serde_json::from_slice(&data)
                    .map_err(|e| Error::Archive(format!("failed to parse index.json: {e}")))?;
                root_index = Some(index);
            }
            "oci-layout" => {
                let data = read_entry(&mut entry, &name)?;
                let layout: ImageLayout = serde_json::from_slice(&data)
                    .map_err(|e| Error::Archive(format!("failed to parse oci-layout: {e}")))?;
                root_layout = Some(layout);
            }
            _ => {
                let digest = blob_digest(&name).ok_or_else(|| {
                    Error::Archive(format!("unexpected entry '{name}' in archive"))
                })?;
                let data = maybe_gunzip(read_entry(&mut entry, &name)?);
                match classify_blob(&digest, data)? {
                    BlobKind::Index(index) => {
                        indexes.insert(digest, index);
                    }
                    BlobKind::Manifest(manifest) => {
                        manifests.insert(digest, manifest);
                    }
                    BlobKind::Image(image) => {
                        images.insert(digest, *image);
                    }
                    BlobKind::Opaque(data) => {
                        blobs.insert(digest, data);
                    }
                }
            }
        }
    }

    let index = root_index
        .ok_or_else(|| Error::Archive("missing index.json in archive".to_string()))?;
    let layout = root_layout
        .ok_or_else(|| Error::Archive("missing oci-layout in archive".to_string()))?;

    let archive = Archive {
        root: ArchiveRoot { index, layout },
        indexes,
        manifests,
        images,
        blobs,
    };
    verify_references(&archive)?;

    tracing::debug!(
        path = %path.display(),
        indexes = archive.indexes.len(),
        manifests = archive.manifests.len(),
        images = archive.images.len(),
        blobs = archive.blobs.len(),
        "Decoded build-record archive"
    );

    Ok(archive)
}

/// Read one tar entry to completion.
fn read_entry(entry: &mut tar::Entry<'_, GzDecoder<std::fs::File>>, name: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| Error::Archive(format!("failed to read entry '{name}': {e}")))?;
    Ok(data)
}

/// Reconstruct a `<algo>:<hex>` digest from a `blobs/<algo>/<hex>` path.
fn blob_digest(name: &str) -> Option<String> {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        ["blobs", algorithm, hex] if !algorithm.is_empty() && !hex.is_empty() => {
            Some(format!("{algorithm}:{hex}"))
        }
        _ => None,
    }
}

/// Decompress a blob when it carries the gzip magic; raw bytes otherwise.
///
/// Blobs in exported archives may or may not be compressed; a payload
/// that looks compressed but fails to inflate is kept as-is.
fn maybe_gunzip(data: Vec<u8>) -> Vec<u8> {
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        let mut inflated = Vec::new();
        let mut decoder = GzDecoder::new(data.as_slice());
        match decoder.read_to_end(&mut inflated) {
            Ok(_) => return inflated,
            Err(e) => {
                tracing::debug!(error = %e, "blob has gzip magic but did not inflate, keeping raw bytes");
            }
        }
    }
    data
}

/// Sniff a blob's content and classify it.
///
/// Priority: index (by media type), manifest (by media type and non-empty
/// layers), image config (by non-empty rootfs type), opaque blob.
fn classify_blob(digest: &str, data: Vec<u8>) -> Result<BlobKind> {
    let value: serde_json::Value = match serde_json::from_slice(&data) {
        Ok(v) => v,
        Err(_) => return Ok(BlobKind::Opaque(data)),
    };

    let media_type = value
        .get("mediaType")
        .and_then(|m| m.as_str())
        .unwrap_or_default();

    if is_index_media_type(media_type) {
        let index: ImageIndex = serde_json::from_value(value)
            .map_err(|e| Error::Archive(format!("invalid image index {digest}: {e}")))?;
        return Ok(BlobKind::Index(index));
    }

    let has_layers = value
        .get("layers")
        .and_then(|l| l.as_array())
        .is_some_and(|l| !l.is_empty());
    if is_manifest_media_type(media_type) && has_layers {
        let manifest: ImageManifest = serde_json::from_value(value)
            .map_err(|e| Error::Archive(format!("invalid image manifest {digest}: {e}")))?;
        return Ok(BlobKind::Manifest(manifest));
    }

    let has_rootfs = value
        .pointer("/rootfs/type")
        .and_then(|t| t.as_str())
        .is_some_and(|t| !t.is_empty());
    if has_rootfs {
        match serde_json::from_value::<ImageConfiguration>(value) {
            Ok(image) => return Ok(BlobKind::Image(Box::new(image))),
            Err(e) => {
                tracing::debug!(digest, error = %e, "rootfs-bearing blob did not parse as an image config, keeping as opaque blob");
            }
        }
    }

    Ok(BlobKind::Opaque(data))
}

/// Verify that every cross-reference inside the archive resolves.
fn verify_references(archive: &Archive) -> Result<()> {
    for (digest, manifest) in &archive.manifests {
        let config_digest = manifest.config().digest();
        if !archive.contains_digest(config_digest) {
            return Err(Error::Archive(format!(
                "manifest {digest} references missing config blob {config_digest}"
            )));
        }
        for layer in manifest.layers() {
            if !archive.contains_digest(layer.digest()) {
                return Err(Error::Archive(format!(
                    "manifest {digest} references missing layer blob {}",
                    layer.digest()
                )));
            }
        }
    }

    let nested = archive
        .indexes
        .values()
        .chain(std::iter::once(&archive.root.index));
    for index in nested {
        for descriptor in index.manifests() {
            if is_index_media_type(&descriptor.media_type().to_string())
                && !archive.indexes.contains_key(descriptor.digest().as_str())
            {
                return Err(Error::Archive(format!(
                    "index references missing nested index {}",
                    descriptor.digest()
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{MEDIATYPE_HISTORY_RECORD, MEDIATYPE_IMAGE_INDEX, MEDIATYPE_IMAGE_MANIFEST};
    use std::io::Write;
    use tempfile::TempDir;

    // Helper to build a gzip-compressed tar archive from (path, content) pairs
    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use tar::Builder;

        let file = std::fs::File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }

        builder.finish().unwrap();
    }

    fn layout_json() -> &'static [u8] {
        br#"{"imageLayoutVersion":"1.0.0"}"#
    }

    fn index_json(manifest_digest: &str, media_type: &str) -> Vec<u8> {
        format!(
            r#"{{
            "schemaVersion": 2,
            "mediaType": "{MEDIATYPE_IMAGE_INDEX}",
            "manifests": [
                {{
                    "mediaType": "{media_type}",
                    "digest": "{manifest_digest}",
                    "size": 100
                }}
            ]
        }}"#
        )
        .into_bytes()
    }

    fn manifest_json(config_digest: &str, layer_digest: &str) -> Vec<u8> {
        format!(
            r#"{{
            "schemaVersion": 2,
            "mediaType": "{MEDIATYPE_IMAGE_MANIFEST}",
            "config": {{
                "mediaType": "{MEDIATYPE_HISTORY_RECORD}",
                "digest": "{config_digest}",
                "size": 100
            }},
            "layers": [
                {{
                    "mediaType": "application/vnd.buildkit.solvestatus.v0",
                    "digest": "{layer_digest}",
                    "size": 100
                }}
            ]
        }}"#
        )
        .into_bytes()
    }

    #[test]
    fn test_load_archive_minimal() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");

        let index = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        let manifest = manifest_json("sha256:ccc", "sha256:lll");
        write_archive(
            &archive_path,
            &[
                ("index.json", index.as_slice()),
                ("oci-layout", layout_json()),
                ("blobs/sha256/mmm", manifest.as_slice()),
                ("blobs/sha256/ccc", br#"{"Ref":"abc"}"#),
                ("blobs/sha256/lll", br#"{"vertexes":[]}"#),
            ],
        );

        let archive = load_archive(&archive_path).unwrap();
        assert_eq!(archive.root.layout.image_layout_version, "1.0.0");
        assert_eq!(archive.root.index.manifests().len(), 1);
        assert!(archive.manifests.contains_key("sha256:mmm"));
        assert!(archive.blobs.contains_key("sha256:ccc"));
        assert!(archive.blobs.contains_key("sha256:lll"));
        assert!(archive.indexes.is_empty());
        assert!(archive.images.is_empty());
    }

    #[test]
    fn test_load_archive_missing_index() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        write_archive(&archive_path, &[("oci-layout", layout_json())]);

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err.to_string().contains("missing index.json"));
    }

    #[test]
    fn test_load_archive_missing_layout() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let index = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        write_archive(&archive_path, &[("index.json", index.as_slice())]);

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err.to_string().contains("missing oci-layout"));
    }

    #[test]
    fn test_load_archive_unexpected_entry() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        write_archive(
            &archive_path,
            &[
                ("index.json", br#"{"schemaVersion":2,"manifests":[]}"#),
                ("oci-layout", layout_json()),
                ("random.txt", b"nope"),
            ],
        );

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err.to_string().contains("unexpected entry 'random.txt'"));
    }

    #[test]
    fn test_load_archive_not_gzip() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        std::fs::write(&archive_path, b"plain text, not a gzip stream").unwrap();

        assert!(load_archive(&archive_path).is_err());
    }

    #[test]
    fn test_load_archive_index_size_cap() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let oversized = vec![b' '; (MAX_INDEX_JSON_SIZE + 1) as usize];
        write_archive(
            &archive_path,
            &[
                ("index.json", oversized.as_slice()),
                ("oci-layout", layout_json()),
            ],
        );

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }

    #[test]
    fn test_load_archive_dangling_config_blob() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let index = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        let manifest = manifest_json("sha256:gone", "sha256:lll");
        write_archive(
            &archive_path,
            &[
                ("index.json", index.as_slice()),
                ("oci-layout", layout_json()),
                ("blobs/sha256/mmm", manifest.as_slice()),
                ("blobs/sha256/lll", br#"{"vertexes":[]}"#),
            ],
        );

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err.to_string().contains("missing config blob sha256:gone"));
    }

    #[test]
    fn test_load_archive_missing_nested_index() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let index = index_json("sha256:nested", MEDIATYPE_IMAGE_INDEX);
        write_archive(
            &archive_path,
            &[
                ("index.json", index.as_slice()),
                ("oci-layout", layout_json()),
            ],
        );

        let err = load_archive(&archive_path).unwrap_err();
        assert!(err
            .to_string()
            .contains("missing nested index sha256:nested"));
    }

    #[test]
    fn test_load_archive_classifies_nested_index_blob() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let root = index_json("sha256:nested", MEDIATYPE_IMAGE_INDEX);
        let nested = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        let manifest = manifest_json("sha256:ccc", "sha256:lll");
        write_archive(
            &archive_path,
            &[
                ("index.json", root.as_slice()),
                ("oci-layout", layout_json()),
                ("blobs/sha256/nested", nested.as_slice()),
                ("blobs/sha256/mmm", manifest.as_slice()),
                ("blobs/sha256/ccc", br#"{"Ref":"abc"}"#),
                ("blobs/sha256/lll", br#"{"vertexes":[]}"#),
            ],
        );

        let archive = load_archive(&archive_path).unwrap();
        assert!(archive.indexes.contains_key("sha256:nested"));
        assert!(archive.manifests.contains_key("sha256:mmm"));
    }

    #[test]
    fn test_load_archive_classifies_image_config() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        let index = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        let manifest = format!(
            r#"{{
            "schemaVersion": 2,
            "mediaType": "{MEDIATYPE_IMAGE_MANIFEST}",
            "config": {{
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:img",
                "size": 100
            }},
            "layers": [
                {{
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": "sha256:lll",
                    "size": 100
                }}
            ]
        }}"#
        );
        let image_config = br#"{
            "architecture": "amd64",
            "os": "linux",
            "rootfs": {"type": "layers", "diff_ids": ["sha256:aaa"]}
        }"#;
        write_archive(
            &archive_path,
            &[
                ("index.json", index.as_slice()),
                ("oci-layout", layout_json()),
                ("blobs/sha256/mmm", manifest.as_bytes()),
                ("blobs/sha256/img", image_config),
                ("blobs/sha256/lll", b"opaque layer bytes"),
            ],
        );

        let archive = load_archive(&archive_path).unwrap();
        assert!(archive.images.contains_key("sha256:img"));
        assert!(archive.blobs.contains_key("sha256:lll"));
    }

    #[test]
    fn test_load_archive_gunzips_compressed_blob() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"vertexes":[]}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let index = index_json("sha256:mmm", MEDIATYPE_IMAGE_MANIFEST);
        let manifest = manifest_json("sha256:ccc", "sha256:lll");
        write_archive(
            &archive_path,
            &[
                ("index.json", index.as_slice()),
                ("oci-layout", layout_json()),
                ("blobs/sha256/mmm", manifest.as_slice()),
                ("blobs/sha256/ccc", br#"{"Ref":"abc"}"#),
                ("blobs/sha256/lll", compressed.as_slice()),
            ],
        );

        let archive = load_archive(&archive_path).unwrap();
        assert_eq!(
            archive.blobs.get("sha256:lll").unwrap(),
            br#"{"vertexes":[]}"#
        );
    }

    #[test]
    fn test_load_archive_accepts_dot_slash_paths() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("rec.dockerbuild");
        write_archive(
            &archive_path,
            &[
                ("./index.json", br#"{"schemaVersion":2,"manifests":[]}"#),
                ("./oci-layout", layout_json()),
            ],
        );

        let archive = load_archive(&archive_path).unwrap();
        assert!(archive.root.index.manifests().is_empty());
    }

    #[test]
    fn test_blob_digest() {
        assert_eq!(
            blob_digest("blobs/sha256/abc123"),
            Some("sha256:abc123".to_string())
        );
        assert_eq!(blob_digest("blobs/sha256"), None);
        assert_eq!(blob_digest("blobs/sha256/abc/extra"), None);
        assert_eq!(blob_digest("other/sha256/abc"), None);
        assert_eq!(blob_digest("blobs//abc"), None);
    }

    #[test]
    fn test_maybe_gunzip_passthrough() {
        let raw = b"not compressed".to_vec();
        assert_eq!(maybe_gunzip(raw.clone()), raw);
    }

    #[test]
    fn test_maybe_gunzip_bad_stream_kept_raw() {
        // gzip magic but garbage after it
        let bogus = vec![0x1f, 0x8b, 0xff, 0x00, 0x01];
        assert_eq!(maybe_gunzip(bogus.clone()), bogus);
    }
}
