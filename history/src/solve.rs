//! Solve-status wire types.
//!
//! Shapes of the progress stream the build tool embeds in exported
//! records: vertexes, statuses, logs and warnings. Byte-valued fields
//! (`short`, `detail`, source `data`) arrive base64-encoded and are kept
//! encoded until a consumer needs the text.

use serde::{Deserialize, Serialize};

/// Full solve status attached to a build record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertexes: Vec<Vertex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<VertexStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<VertexLog>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<VertexWarning>,
}

/// One node of the build graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress of one vertex operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub vertex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub current: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

/// One log chunk emitted by a vertex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexLog {
    #[serde(default)]
    pub vertex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub stream: i32,
    /// Base64-encoded log bytes.
    #[serde(default)]
    pub data: String,
}

/// A warning raised while solving (e.g. a Dockerfile lint hit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexWarning {
    #[serde(default)]
    pub vertex: String,
    #[serde(default)]
    pub level: i32,
    /// Base64-encoded one-line message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    /// Base64-encoded detail segments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "sourceInfo", skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<Range>,
}

/// Source file a warning points into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Base64-encoded file content as seen by the build.
    #[serde(default)]
    pub data: String,
}

/// A source range (start/end positions).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Range {
    #[serde(default)]
    pub start: Position,
    #[serde(default)]
    pub end: Position,
}

/// A line/character position inside a source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub line: u64,
    #[serde(default)]
    pub character: u64,
}
