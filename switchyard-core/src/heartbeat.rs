//! Liveness probing of job-producing services.
//!
//! A service is only taken offline after two consecutive failed probes.
//! Services taken offline this way keep being probed and come back online
//! once they answer again.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
};

use futures::future::join_all;
use switchyard_model::{ServiceKey, ServiceRegistration};
use tracing::{debug, info, warn};

use crate::{dispatch::WorkerClient, error::Result, registry::ServiceRegistry};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub probed: usize,
    /// First failure, flagged and given another tick.
    pub flagged: usize,
    pub unregistered: usize,
    pub revived: usize,
}

#[derive(Debug, Default)]
struct ProbeState {
    unresponsive: HashSet<ServiceKey>,
    offlined: HashSet<ServiceKey>,
}

pub struct HeartbeatMonitor {
    registry: Arc<ServiceRegistry>,
    client: Arc<dyn WorkerClient>,
    state: Mutex<ProbeState>,
}

impl fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_lock().ok();
        f.debug_struct("HeartbeatMonitor")
            .field(
                "unresponsive",
                &state.as_ref().map(|s| s.unresponsive.len()),
            )
            .field("offlined", &state.as_ref().map(|s| s.offlined.len()))
            .finish_non_exhaustive()
    }
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, client: Arc<dyn WorkerClient>) -> Self {
        Self {
            registry,
            client,
            state: Mutex::new(ProbeState::default()),
        }
    }

    pub fn is_flagged(&self, key: &ServiceKey) -> bool {
        self.state
            .lock()
            .map(|state| state.unresponsive.contains(key))
            .unwrap_or(false)
    }

    /// Whether the monitor took this service offline and will revive it.
    pub fn was_offlined(&self, key: &ServiceKey) -> bool {
        self.state
            .lock()
            .map(|state| state.offlined.contains(key))
            .unwrap_or(false)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ProbeState) -> T) -> Option<T> {
        self.state.lock().ok().map(|mut state| f(&mut state))
    }

    /// Probes every eligible service once.
    pub async fn run_once(&self) -> Result<HeartbeatReport> {
        let mut report = HeartbeatReport::default();

        let targets: Vec<(ServiceRegistration, bool)> = self
            .registry
            .services()
            .await?
            .into_iter()
            .filter_map(|service| {
                if service.online {
                    // Brought back by a re-registration.
                    self.with_state(|state| state.offlined.remove(&service.key()));
                }
                let revivable = !service.online
                    && service.job_producer
                    && !service.maintenance_mode
                    && self.was_offlined(&service.key());
                (is_monitored(&service) || revivable).then_some((service, revivable))
            })
            .collect();

        let probes = join_all(targets.iter().map(|(service, _)| async move {
            let url = service.dispatch_url();
            match self.client.probe(&url).await {
                Ok(alive) => alive,
                Err(err) => {
                    debug!(target: "heartbeat", service = %service.key(), error = %err, "probe failed");
                    false
                }
            }
        }))
        .await;

        for ((service, revivable), alive) in targets.into_iter().zip(probes) {
            let key = service.key();
            report.probed += 1;

            if alive {
                self.with_state(|state| state.unresponsive.remove(&key));
                if revivable {
                    self.registry.revive_service(&key).await?;
                    self.with_state(|state| state.offlined.remove(&key));
                    report.revived += 1;
                }
                continue;
            }

            if revivable {
                continue;
            }

            let second_failure = self
                .with_state(|state| {
                    if state.unresponsive.remove(&key) {
                        true
                    } else {
                        state.unresponsive.insert(key.clone());
                        false
                    }
                })
                .unwrap_or(false);

            if second_failure {
                warn!(target: "heartbeat", service = %key, "service unresponsive twice, unregistering");
                match self
                    .registry
                    .unregister_service(&service.service_type, &service.host)
                    .await
                {
                    Ok(()) => {
                        self.with_state(|state| state.offlined.insert(key.clone()));
                        report.unregistered += 1;
                    }
                    Err(err) => {
                        warn!(target: "heartbeat", service = %key, error = %err, "failed to unregister service");
                    }
                }
            } else {
                info!(target: "heartbeat", service = %key, "service did not answer, flagged");
                report.flagged += 1;
            }
        }

        Ok(report)
    }
}

fn is_monitored(service: &ServiceRegistration) -> bool {
    service.online && !service.maintenance_mode && service.job_producer
}
