use crate::guard::GuardPhase;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error during {op} on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt document at {}: {source}", path.display())]
    CorruptDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid storage path: {0:?}")]
    InvalidPath(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Guard violation: {0}")]
    GuardViolation(String),

    #[error("Guard aborted in phase '{phase}', changes rolled back: {source}")]
    Aborted {
        phase: GuardPhase,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Rollback failed for project {project_id} after {cause}: {}", failures.join("; "))]
    RollbackFailure {
        project_id: String,
        cause: String,
        failures: Vec<String>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl StoreError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
