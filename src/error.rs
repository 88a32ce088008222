use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Malformed occurrence {occurrence}: {reason}")]
    MalformedInput { occurrence: String, reason: String },

    #[error("Cluster {cluster} ended up with no usages")]
    EmptyCluster { cluster: usize },

    #[error("Failed to write dataset to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Corrupt dataset: {0}")]
    CorruptDataset(String),

    #[error("No image record with id {0}")]
    UnknownRecord(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    pub fn malformed(occurrence: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedInput {
            occurrence: occurrence.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
