use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoksError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to sync bucket '{name}': {stderr}")]
    BucketSync { name: String, stderr: String },

    #[error("manifest '{app}.json' not found (searched buckets: {})", searched.join(", "))]
    ManifestNotFound { app: String, searched: Vec<String> },

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("version {version} not found for app {app}")]
    VersionNotFound { app: String, version: String },

    #[error("version {version} of {app} is yanked: {reason}")]
    YankedVersion {
        app: String,
        version: String,
        reason: String,
    },

    #[error("no archive for os={os}, arch={arch} (available: {})", available.join(", "))]
    UnsupportedPlatform {
        os: String,
        arch: String,
        available: Vec<String>,
    },

    #[error("unresolved variable ${{{name}}} in template '{template}'")]
    VariableUnresolved { name: String, template: String },

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("SHA256 mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
        url: String,
    },

    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    #[error("unsafe path in archive entry: {}", .0.display())]
    UnsafeArchive(PathBuf),

    #[error("extract_dir '{0}' not found in extracted archive")]
    ExtractDirNotFound(String),

    #[error(
        "cannot patch '{}': install path ({install_len} bytes) exceeds placeholder ({placeholder_len} bytes)",
        file.display()
    )]
    PrefixTooLong {
        file: PathBuf,
        install_len: usize,
        placeholder_len: usize,
    },

    #[error("app {0} is not installed")]
    NotInstalled(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PoksError {
    /// CLI exit code for this error. Stronger codes describe more specific
    /// failures: 5 network, 4 checksum, 3 not found, 1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            PoksError::Http { .. } | PoksError::Request(_) => 5,
            PoksError::ChecksumMismatch { .. } => 4,
            PoksError::ManifestNotFound { .. }
            | PoksError::VersionNotFound { .. }
            | PoksError::NotInstalled(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoksError>;
