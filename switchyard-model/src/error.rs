use std::fmt::{self, Display};

/// Errors produced by model parsing and load bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidStatus(String),
    InvalidFailureReason(String),
    InvalidServiceState(String),
    InvalidJobId(String),
    UnknownHost(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidStatus(raw) => {
                write!(f, "invalid job status: {raw}")
            }
            ModelError::InvalidFailureReason(raw) => {
                write!(f, "invalid failure reason: {raw}")
            }
            ModelError::InvalidServiceState(raw) => {
                write!(f, "invalid service state: {raw}")
            }
            ModelError::InvalidJobId(raw) => write!(f, "invalid job id: {raw}"),
            ModelError::UnknownHost(host) => {
                write!(f, "host {host} is not part of the load snapshot")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
