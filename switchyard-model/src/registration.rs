use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{concat_url, error::ModelError, job::JobSignature};

/// A node that hosts services and advertises how much load it can take.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HostRegistration {
    pub base_url: String,
    pub ip_address: String,
    pub node_name: String,
    pub memory: u64,
    pub cores: u32,
    pub max_load: f32,
    pub online: bool,
    pub active: bool,
    pub maintenance_mode: bool,
}

impl HostRegistration {
    pub fn new(
        base_url: impl Into<String>,
        ip_address: impl Into<String>,
        node_name: impl Into<String>,
        memory: u64,
        cores: u32,
        max_load: f32,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ip_address: ip_address.into(),
            node_name: node_name.into(),
            memory,
            cores,
            max_load,
            online: true,
            active: true,
            maintenance_mode: false,
        }
    }

    /// Whether the dispatcher may send work to this node at all.
    pub fn is_available(&self) -> bool {
        self.online && self.active && !self.maintenance_mode
    }
}

/// Health of a service with respect to the jobs it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ServiceState {
    #[default]
    Normal,
    Warning,
    Error,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Normal => "NORMAL",
            ServiceState::Warning => "WARNING",
            ServiceState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(ServiceState::Normal),
            "WARNING" => Ok(ServiceState::Warning),
            "ERROR" => Ok(ServiceState::Error),
            _ => Err(ModelError::InvalidServiceState(s.to_string())),
        }
    }
}

/// Composite key of a service registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceKey {
    pub service_type: String,
    pub host: String,
}

impl ServiceKey {
    pub fn new(service_type: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_type, self.host)
    }
}

/// A typed capability offered by a host.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceRegistration {
    pub service_type: String,
    pub host: String,
    pub path: String,
    pub online: bool,
    pub active: bool,
    pub maintenance_mode: bool,
    pub job_producer: bool,
    pub online_from: DateTime<Utc>,
    pub state: ServiceState,
    pub state_changed: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub warning_state_trigger: Option<JobSignature>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub error_state_trigger: Option<JobSignature>,
}

impl ServiceRegistration {
    pub fn new(
        host: &HostRegistration,
        service_type: impl Into<String>,
        path: impl Into<String>,
        job_producer: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            service_type: service_type.into(),
            host: host.base_url.clone(),
            path: path.into(),
            online: true,
            active: host.active,
            maintenance_mode: host.maintenance_mode,
            job_producer,
            online_from: now,
            state: ServiceState::Normal,
            state_changed: now,
            warning_state_trigger: None,
            error_state_trigger: None,
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.service_type.clone(), self.host.clone())
    }

    /// Online, active, not in maintenance and not in ERROR.
    pub fn is_dispatch_eligible(&self) -> bool {
        self.online
            && self.active
            && !self.maintenance_mode
            && self.state != ServiceState::Error
    }

    /// Endpoint that receives dispatch requests and heartbeat probes.
    pub fn dispatch_url(&self) -> String {
        concat_url(&[&self.host, &self.path, "dispatch"])
    }

    /// Moves the service into `state`.
    ///
    /// Going back to NORMAL clears both triggers. Entering WARNING records the
    /// trigger as warning trigger; entering ERROR records it as error trigger
    /// and keeps the warning trigger so a later de-escalation can restore it.
    pub fn set_state(&mut self, state: ServiceState, trigger: Option<JobSignature>) {
        match state {
            ServiceState::Normal => {
                self.warning_state_trigger = None;
                self.error_state_trigger = None;
            }
            ServiceState::Warning => {
                if trigger.is_some() {
                    self.warning_state_trigger = trigger;
                }
                self.error_state_trigger = None;
            }
            ServiceState::Error => self.error_state_trigger = trigger,
        }
        self.state = state;
        self.state_changed = Utc::now();
    }

    /// Whether the current WARNING/ERROR state was caused by `signature`.
    pub fn is_triggered_by(&self, signature: &JobSignature) -> bool {
        match self.state {
            ServiceState::Normal => false,
            ServiceState::Warning => {
                self.warning_state_trigger.as_ref() == Some(signature)
            }
            ServiceState::Error => {
                self.error_state_trigger.as_ref() == Some(signature)
            }
        }
    }
}

impl fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_type, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceRegistration {
        let host = HostRegistration::new("http://a:8080", "10.0.0.1", "a", 1 << 30, 8, 4.0);
        ServiceRegistration::new(&host, "encode", "/composer", true)
    }

    #[test]
    fn dispatch_url_joins_host_and_path() {
        assert_eq!(service().dispatch_url(), "http://a:8080/composer/dispatch");
    }

    #[test]
    fn error_state_keeps_warning_trigger_and_excludes_dispatch() {
        let mut svc = service();
        let first = JobSignature("first".into());
        let second = JobSignature("second".into());

        svc.set_state(ServiceState::Warning, Some(first.clone()));
        assert!(svc.is_triggered_by(&first));
        assert!(svc.is_dispatch_eligible());

        svc.set_state(ServiceState::Error, Some(second.clone()));
        assert!(svc.is_triggered_by(&second));
        assert!(!svc.is_triggered_by(&first));
        assert_eq!(svc.warning_state_trigger, Some(first));
        assert!(!svc.is_dispatch_eligible());

        svc.set_state(ServiceState::Normal, None);
        assert!(svc.warning_state_trigger.is_none());
        assert!(svc.error_state_trigger.is_none());
    }
}
