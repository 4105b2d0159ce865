use std::path::PathBuf;
use thiserror::Error;

/// Problems with the environment manifest, detected before any mutation
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid package spec '{0}'")]
    InvalidPackage(String),

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The installer could not be fetched; no partial download is kept
    #[error("Installer download from {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// Refuses to touch an install target that already holds an installation
    #[error("Install target {0} is already initialized; remove it or choose another path with -p")]
    TargetExists(PathBuf),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Installer exited with {status}: {stderr}")]
    Installer { status: String, stderr: String },

    /// The environment may be partially created; it is left for diagnosis
    #[error("Creating environment '{name}' failed ({status}); partial environment left in {prefix}: {stderr}")]
    EnvironmentCreation {
        name: String,
        prefix: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Network { .. } => 3,
            ProvisionError::TargetExists(_) => 4,
            ProvisionError::Manifest(_) => 5,
            ProvisionError::Installer { .. } | ProvisionError::EnvironmentCreation { .. } => 6,
            ProvisionError::Io { .. } => 11,
        }
    }
}
