use thiserror::Error;

/// Dockerbuild toolkit error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or incomplete build archive
    #[error("Invalid build archive: {0}")]
    Archive(String),

    /// Inconsistent build record (dangling digest, media-type or ref mismatch)
    #[error("Build record error: {0}")]
    Record(String),

    /// Build reference does not split into builder/node/id
    #[error("Invalid build reference '{0}': expected <builder>/<node>/<id>")]
    InvalidRef(String),

    /// No local state stored for a build reference
    #[error("Local state not found for '{reference}' at {path}")]
    LocalStateNotFound { reference: String, path: String },

    /// Record export is not available on this platform
    #[error("Build record export is not supported on {0}")]
    UnsupportedPlatform(String),

    /// No usable container runtime on the host
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Installed build tool is too old
    #[error("buildx {found} is too old: {minimum} or newer is required")]
    UnsupportedVersion { found: String, minimum: String },

    /// Record export pipeline failure
    #[error("Record export failed: {0}")]
    Export(String),

    /// Subprocess exited non-zero or could not be spawned
    #[error("Command '{command}' failed with exit code {code}: {stderr}")]
    Subprocess {
        command: String,
        code: i32,
        stderr: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias for dockerbuild toolkit operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_error_display() {
        let error = Error::Archive("missing index.json".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid build archive: missing index.json"
        );
    }

    #[test]
    fn test_record_error_display() {
        let error = Error::Record("missing manifest sha256:abc".to_string());
        assert_eq!(
            error.to_string(),
            "Build record error: missing manifest sha256:abc"
        );
    }

    #[test]
    fn test_invalid_ref_display() {
        let error = Error::InvalidRef("only/two".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid build reference 'only/two': expected <builder>/<node>/<id>"
        );
    }

    #[test]
    fn test_local_state_not_found_display() {
        let error = Error::LocalStateNotFound {
            reference: "b/n/abc".to_string(),
            path: "/refs/b/n/abc".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Local state not found for 'b/n/abc' at /refs/b/n/abc"
        );
    }

    #[test]
    fn test_unsupported_version_display() {
        let error = Error::UnsupportedVersion {
            found: "0.11.2".to_string(),
            minimum: "0.13.0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "buildx 0.11.2 is too old: 0.13.0 or newer is required"
        );
    }

    #[test]
    fn test_subprocess_error_display() {
        let error = Error::Subprocess {
            command: "docker buildx version".to_string(),
            code: 1,
            stderr: "unknown flag".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Command 'docker buildx version' failed with exit code 1: unknown flag"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_str = "{ invalid json }";
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str(json_str);
        let json_error = result.unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Serialization(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(Error::Other("test error".to_string()))
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_debug() {
        let error = Error::Export("fifo bridge failed".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("Export"));
    }
}
