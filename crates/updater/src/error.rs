use std::path::PathBuf;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while checking for, downloading or applying an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// The HTTP transport failed (connect, TLS, body stream).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a status the updater does not accept.
    #[error("network error {status}")]
    Network {
        /// HTTP status code returned by the server.
        status: u16,
    },
    /// Redirect chain exceeded the configured bound.
    #[error("too many redirects (limit {max})")]
    RedirectLoop {
        /// Maximum number of redirects that were allowed.
        max: usize,
    },
    /// A redirect response carried no usable `Location` header.
    #[error("redirect response without a location header")]
    MissingRedirectLocation,
    /// The artefact hash did not match the manifest.
    #[error("integrity check failed (expected {expected}, got {actual})")]
    IntegrityMismatch {
        /// Expected SHA-256 digest.
        expected: String,
        /// Actual SHA-256 digest, or `missing` when nothing could be hashed.
        actual: String,
    },
    /// The delta manifest could not be decoded from JSON.
    #[error("manifest decoding failed: {0}")]
    ManifestDecode(#[from] serde_json::Error),
    /// The manifest pointed outside of the artefact cache.
    #[error("artifact path escapes the cache directory: {0}")]
    InvalidArtifactPath(PathBuf),
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse or compare versions.
    #[error("version error: {0}")]
    Version(#[from] semver::Error),
    /// A feed or artefact URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// Reading or writing the attempt record failed.
    #[error("update state persistence failed: {0}")]
    Persistence(String),
    /// The patch mechanism could not be started.
    #[error("failed to apply patch: {0}")]
    PatchApply(String),
    /// The native update engine reported a failure.
    #[error("update engine error: {0}")]
    Engine(String),
    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
    /// Attempts to perform an operation on an unsupported platform.
    #[error("unsupported operation on this platform: {0}")]
    Unsupported(&'static str),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl UpdaterError {
    /// Helper for wrapping validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        UpdaterError::Other(msg.into())
    }
}
