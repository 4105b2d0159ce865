use crate::config::SettingsError;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed or out-of-range pipeline configuration, found before any launch
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Analysis script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing required setting '{0}'")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Light-curve section {section} is out of range: the configuration defines {num_sections} section(s)")]
    SectionOutOfRange { section: usize, num_sections: usize },
}

/// Invocation failures
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Combination attempted while some sections lack a well-formed output
    #[error("Light curve incomplete: missing section(s) {}", join_indices(.missing))]
    IncompleteStage { missing: Vec<usize> },

    /// The external analysis could not be started
    #[error("Failed to launch {program}: {reason}")]
    ExternalTool { program: PathBuf, reason: String },

    #[error("Open-file limit is {got}, below the required minimum of {wanted}")]
    ResourceLimit { wanted: u64, got: u64 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl InvokeError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        InvokeError::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            InvokeError::Settings(_) => 2,
            InvokeError::Config(_) => 7,
            InvokeError::IncompleteStage { .. } => 8,
            InvokeError::ExternalTool { .. } => 9,
            InvokeError::ResourceLimit { .. } => 10,
            InvokeError::Io { .. } => 11,
        }
    }
}
