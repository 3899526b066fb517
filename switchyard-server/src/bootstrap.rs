//! Process wiring shared by the binary and the API tests.

use std::sync::Arc;

use anyhow::Context;
use switchyard_config::{AppConfig, IdentityConfig};
use switchyard_core::{
    InMemoryStore, JobStore, RegistrationStore, ServiceRegistry, StaticDirectory,
};
use switchyard_model::HostRegistration;
use tracing::info;
use url::Url;

/// Job and registration storage behind the registry.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub registrations: Arc<dyn RegistrationStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            jobs: store.clone(),
            registrations: store,
        }
    }

    #[cfg(feature = "database")]
    pub async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let store = Arc::new(
            switchyard_core::PostgresStore::connect(database_url)
                .await
                .context("failed to connect to PostgreSQL")?,
        );
        Ok(Self {
            jobs: store.clone(),
            registrations: store,
        })
    }

    /// PostgreSQL when a URL is configured and the `database` feature is
    /// built, memory otherwise.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match config.database.url.as_deref() {
            #[cfg(feature = "database")]
            Some(url) => {
                info!("using PostgreSQL job store");
                Self::postgres(url).await
            }
            #[cfg(not(feature = "database"))]
            Some(_) => {
                tracing::warn!(
                    "database url configured but the server was built without the `database` feature; keeping state in memory"
                );
                Ok(Self::in_memory())
            }
            None => {
                info!("no database configured; keeping state in memory");
                Ok(Self::in_memory())
            }
        }
    }
}

pub fn build_registry(stores: &Stores, config: &AppConfig) -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new(
        Arc::clone(&stores.jobs),
        Arc::clone(&stores.registrations),
        config.registry.clone(),
        config.server.public_url.clone(),
    ))
}

pub fn identity_directory(identity: &IdentityConfig) -> StaticDirectory {
    if identity.accept_any_user {
        return StaticDirectory::permissive(identity.organizations.iter().cloned());
    }
    let mut directory = identity
        .organizations
        .iter()
        .fold(StaticDirectory::new(), |directory, org| {
            directory.with_organization(org.clone())
        });
    for (org, user) in identity.user_pairs() {
        directory = directory.with_user(org, user);
    }
    directory
}

/// Registration this node announces for itself.
pub fn own_host(config: &AppConfig) -> anyhow::Result<HostRegistration> {
    let public_url = &config.server.public_url;
    let url = Url::parse(public_url)
        .with_context(|| format!("public url {public_url} is not a valid URL"))?;
    let host = url
        .host_str()
        .with_context(|| format!("public url {public_url} has no host"))?
        .to_string();
    let ip_address = match url.host() {
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        _ => config.server.host.clone(),
    };
    let cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);

    Ok(HostRegistration::new(
        public_url.clone(),
        ip_address,
        host,
        0,
        cores,
        config.server.max_load,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_host_uses_public_url() {
        let mut config = AppConfig::default();
        config.server.public_url = "http://10.1.2.3:9000".into();
        config.server.max_load = 4.0;
        let host = own_host(&config).unwrap();
        assert_eq!(host.base_url, "http://10.1.2.3:9000");
        assert_eq!(host.ip_address, "10.1.2.3");
        assert_eq!(host.node_name, "10.1.2.3");
        assert_eq!(host.max_load, 4.0);
        assert!(host.is_available());
    }

    #[test]
    fn named_host_falls_back_to_bind_address_for_ip() {
        let mut config = AppConfig::default();
        config.server.public_url = "https://registry.example.org".into();
        let host = own_host(&config).unwrap();
        assert_eq!(host.node_name, "registry.example.org");
        assert_eq!(host.ip_address, "0.0.0.0");
    }
}
