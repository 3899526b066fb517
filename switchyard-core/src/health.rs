//! Per-service NORMAL/WARNING/ERROR tracking.
//!
//! Failures are correlated across services through the job signature. When
//! several services fail the same work, the work is suspect rather than any
//! single service, so those services are walked back one level instead of the
//! current one being escalated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchyard_model::{
    Job, JobSignature, JobStatus, ServiceKey, ServiceRegistration, ServiceState,
};
use tracing::{debug, info};

use crate::{
    config::HealthConfig,
    error::Result,
    store::{JobFilter, JobStore, RegistrationStore},
};

/// What a terminal job event did to service health.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthOutcome {
    Unchanged,
    Escalated { service: ServiceKey, to: ServiceState },
    Recovered { service: ServiceKey },
    Relieved { services: Vec<ServiceKey> },
}

/// Counts of services per health state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub normal: usize,
    pub warning: usize,
    pub error: usize,
}

impl HealthSummary {
    pub fn from_services<'a>(
        services: impl IntoIterator<Item = &'a ServiceRegistration>,
    ) -> Self {
        services
            .into_iter()
            .fold(Self::default(), |mut acc, service| {
                match service.state {
                    ServiceState::Normal => acc.normal += 1,
                    ServiceState::Warning => acc.warning += 1,
                    ServiceState::Error => acc.error += 1,
                }
                acc
            })
    }
}

pub struct HealthTracker {
    jobs: Arc<dyn JobStore>,
    registrations: Arc<dyn RegistrationStore>,
    config: HealthConfig,
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthTracker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        registrations: Arc<dyn RegistrationStore>,
        config: HealthConfig,
    ) -> Self {
        Self {
            jobs,
            registrations,
            config,
        }
    }

    /// Applies the health consequences of `job` having reached its current
    /// status. Only FAILED and FINISHED jobs with a processor do anything.
    pub async fn observe(&self, job: &Job) -> Result<HealthOutcome> {
        let Some(host) = job.processor_host.as_deref() else {
            return Ok(HealthOutcome::Unchanged);
        };
        let key = ServiceKey::new(job.job_type.clone(), host);
        let Some(mut service) = self.registrations.service(&key).await? else {
            return Ok(HealthOutcome::Unchanged);
        };

        match job.status {
            JobStatus::Failed if job.failure_reason.affects_service_health() => {
                self.on_failure(job, &mut service).await
            }
            JobStatus::Finished if service.state == ServiceState::Warning => {
                service.set_state(ServiceState::Normal, None);
                self.registrations.save_service(&service).await?;
                info!(
                    target: "health",
                    service = %key,
                    job_id = %job.id,
                    "service recovered after successful job"
                );
                Ok(HealthOutcome::Recovered { service: key })
            }
            _ => Ok(HealthOutcome::Unchanged),
        }
    }

    async fn on_failure(
        &self,
        job: &Job,
        service: &mut ServiceRegistration,
    ) -> Result<HealthOutcome> {
        let signature = job.signature();
        let related = self.related_services(service, &signature).await?;

        if !related.is_empty() {
            let mut relieved = Vec::with_capacity(related.len());
            for mut other in related {
                let next = match other.state {
                    ServiceState::Error => ServiceState::Warning,
                    _ => ServiceState::Normal,
                };
                other.set_state(next, None);
                self.registrations.save_service(&other).await?;
                info!(
                    target: "health",
                    service = %other,
                    state = %next,
                    signature = %signature,
                    "job failed on several services, relieving"
                );
                relieved.push(other.key());
            }
            return Ok(HealthOutcome::Relieved { services: relieved });
        }

        let next = match service.state {
            ServiceState::Normal => ServiceState::Warning,
            ServiceState::Warning => {
                if !self.config.allows_error_state(&service.service_type) {
                    debug!(
                        target: "health",
                        service = %service,
                        "error state disabled for service type"
                    );
                    return Ok(HealthOutcome::Unchanged);
                }
                let failures = self.failure_history(service).await?;
                if failures < u64::from(self.config.max_attempts_before_error) {
                    debug!(
                        target: "health",
                        service = %service,
                        failures,
                        "failure history below error threshold"
                    );
                    return Ok(HealthOutcome::Unchanged);
                }
                ServiceState::Error
            }
            ServiceState::Error => return Ok(HealthOutcome::Unchanged),
        };

        service.set_state(next, Some(signature.clone()));
        self.registrations.save_service(service).await?;
        info!(
            target: "health",
            service = %service,
            state = %next,
            job_id = %job.id,
            signature = %signature,
            "service escalated"
        );
        Ok(HealthOutcome::Escalated {
            service: service.key(),
            to: next,
        })
    }

    /// Other services of the same type whose current WARNING/ERROR was
    /// caused by `signature`.
    async fn related_services(
        &self,
        current: &ServiceRegistration,
        signature: &JobSignature,
    ) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .registrations
            .services_of_type(&current.service_type)
            .await?
            .into_iter()
            .filter(|s| s.host != current.host && s.is_triggered_by(signature))
            .collect())
    }

    /// Failed jobs of this service completed since it last changed state.
    async fn failure_history(&self, service: &ServiceRegistration) -> Result<u64> {
        let filter = JobFilter {
            completed_after: Some(service.state_changed),
            ..JobFilter::processing_on(
                &service.service_type,
                &service.host,
                &[JobStatus::Failed],
            )
        };
        self.jobs.count(&filter).await
    }

    /// Administrative reset to NORMAL.
    pub async fn sanitize(&self, key: &ServiceKey) -> Result<ServiceRegistration> {
        let mut service = self
            .registrations
            .service(key)
            .await?
            .ok_or_else(|| crate::error::RegistryError::not_found(format!("service {key}")))?;
        service.set_state(ServiceState::Normal, None);
        self.registrations.save_service(&service).await?;
        info!(target: "health", service = %key, "service sanitized");
        Ok(service)
    }
}
