use serde::{Deserialize, Serialize};
use switchyard_core::RegistryConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ORGANIZATION: &str = "default";

/// Effective process configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL this node registers under. Other nodes and workers reach the
    /// registry through it.
    pub public_url: String,
    /// Capacity advertised for this node.
    pub max_load: f32,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public URL derived from the bind address when none is configured.
    pub fn derived_public_url(host: &str, port: u16) -> String {
        let host = match host {
            "0.0.0.0" | "::" | "" => "127.0.0.1",
            other => other,
        };
        format!("http://{host}:{port}")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            public_url: Self::derived_public_url(DEFAULT_HOST, DEFAULT_PORT),
            max_load: default_max_load(),
        }
    }
}

pub fn default_max_load() -> f32 {
    num_cpus::get() as f32
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Without one the registry keeps its state in memory.
    pub url: Option<String>,
}

/// Organisations and users the dispatcher accepts jobs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub organizations: Vec<String>,
    /// Accept any user name within a known organisation.
    pub accept_any_user: bool,
    /// Explicit `organization/user` pairs, used when `accept_any_user` is
    /// off.
    pub users: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            organizations: vec![DEFAULT_ORGANIZATION.to_string()],
            accept_any_user: true,
            users: Vec::new(),
        }
    }
}

impl IdentityConfig {
    /// `organization/user` entries split into their halves. Malformed
    /// entries are skipped.
    pub fn user_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.users.iter().filter_map(|entry| {
            let (org, user) = entry.split_once('/')?;
            let (org, user) = (org.trim(), user.trim());
            (!org.is_empty() && !user.is_empty()).then_some((org, user))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_bind_derives_loopback_url() {
        assert_eq!(
            ServerConfig::derived_public_url("0.0.0.0", 9000),
            "http://127.0.0.1:9000"
        );
        assert_eq!(
            ServerConfig::derived_public_url("node-a.internal", 8080),
            "http://node-a.internal:8080"
        );
    }

    #[test]
    fn user_pairs_skip_malformed_entries() {
        let identity = IdentityConfig {
            users: vec!["acme/alice".into(), "broken".into(), "acme/ ".into()],
            ..IdentityConfig::default()
        };
        let pairs: Vec<_> = identity.user_pairs().collect();
        assert_eq!(pairs, vec![("acme", "alice")]);
    }
}
