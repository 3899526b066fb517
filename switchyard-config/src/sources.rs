use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use switchyard_core::RegistryConfig;

use crate::models::IdentityConfig;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub identity: Option<IdentityConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_load: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub const ENV_CONFIG_PATH: &str = "SWITCHYARD_CONFIG";
pub const ENV_HOST: &str = "SWITCHYARD_HOST";
pub const ENV_PORT: &str = "SWITCHYARD_PORT";
pub const ENV_PUBLIC_URL: &str = "SWITCHYARD_PUBLIC_URL";
pub const ENV_MAX_LOAD: &str = "SWITCHYARD_MAX_LOAD";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DISPATCH_INTERVAL: &str = "SWITCHYARD_DISPATCH_INTERVAL";
pub const ENV_HEARTBEAT_INTERVAL: &str = "SWITCHYARD_HEARTBEAT_INTERVAL";
pub const ENV_MAX_ATTEMPTS_BEFORE_ERROR: &str = "SWITCHYARD_MAX_ATTEMPTS_BEFORE_ERROR";
pub const ENV_DEFAULT_JOB_LOAD: &str = "SWITCHYARD_DEFAULT_JOB_LOAD";
pub const ENV_ORGANIZATIONS: &str = "SWITCHYARD_ORGANIZATIONS";
pub const ENV_ACCEPT_ANY_USER: &str = "SWITCHYARD_ACCEPT_ANY_USER";

/// Environment-derived configuration values, still unparsed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    vars: HashMap<String, String>,
}

impl EnvConfig {
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Snapshot of the process environment.
    pub fn gather() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    /// Adds `.env` entries that the environment does not already define.
    pub fn merge_missing(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in entries {
            self.vars.entry(key).or_insert(value);
        }
    }

    /// Value of `key`, ignoring blank values.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}
