use switchyard_model::{JobId, ModelError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The stored version no longer matches the version the caller read.
    #[error("Version conflict on job {id}: expected {expected}")]
    Conflict { id: JobId, expected: i64 },

    /// Another dispatcher claimed the job first.
    #[error("Job {0} is no longer dispatchable")]
    Undispatchable(JobId),

    #[error("No service of type {0} is available")]
    ServiceUnavailable(String),

    #[error("Job {id} rejected by {host}: {reason}")]
    JobRejected {
        id: JobId,
        host: String,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        RegistryError::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Conflict { .. })
    }
}

impl From<ModelError> for RegistryError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownHost(host) => {
                RegistryError::NotFound(format!("host {host}"))
            }
            other => RegistryError::InvalidArgument(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
