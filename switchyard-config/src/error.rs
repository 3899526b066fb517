use std::path::PathBuf;

use thiserror::Error;

/// Reasons a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file {} does not exist", path.display())]
    MissingFile { path: PathBuf },

    #[error("failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("invalid public url '{value}': {reason}")]
    InvalidPublicUrl { value: String, reason: String },
}
