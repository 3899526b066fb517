//! Hosts, services and jobs.
//!
//! `ServiceRegistry` is the single write path for job updates: every status
//! change flows through [`ServiceRegistry::update_job`], which stamps
//! timestamps, keeps the local load counter current and feeds the health
//! tracker.

mod load;
mod selection;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex},
};

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use switchyard_model::{
    FailureReason, HostRegistration, Job, JobId, JobStatus, NodeLoad, ServiceKey,
    ServiceRegistration, SystemLoad, TYPE_WORKFLOW,
};
use tracing::{debug, info, warn};

use crate::{
    config::RegistryConfig,
    error::{RegistryError, Result},
    health::{HealthSummary, HealthTracker},
    store::{JobFilter, JobStore, Page, RegistrationStore},
};

pub use load::LocalLoadCache;
pub use selection::{HostFilter, SelectionMode, rank_candidates};

/// Attempts at re-reading a job after losing an optimistic update during
/// administrative writes (recovery, cancellation).
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Request to create a job on behalf of a registered service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub operation: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default = "default_dispatchable")]
    pub dispatchable: bool,
    #[serde(default)]
    pub parent: Option<JobId>,
    #[serde(default)]
    pub job_load: Option<f32>,
    pub creator: String,
    pub organization: String,
    /// Host of the service creating the job.
    pub created_host: String,
}

fn default_dispatchable() -> bool {
    true
}

impl NewJob {
    pub fn new(
        job_type: impl Into<String>,
        operation: impl Into<String>,
        created_host: impl Into<String>,
        creator: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            payload: None,
            dispatchable: true,
            parent: None,
            job_load: None,
            creator: creator.into(),
            organization: organization.into(),
            created_host: created_host.into(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_load(mut self, load: f32) -> Self {
        self.job_load = Some(load);
        self
    }

    pub fn not_dispatchable(mut self) -> Self {
        self.dispatchable = false;
        self
    }
}

pub struct ServiceRegistry {
    jobs: Arc<dyn JobStore>,
    registrations: Arc<dyn RegistrationStore>,
    health: HealthTracker,
    config: RegistryConfig,
    local_host: String,
    local_load: Mutex<LocalLoadCache>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let own_load = self
            .local_load
            .try_lock()
            .map(|cache| cache.load())
            .unwrap_or_default();
        f.debug_struct("ServiceRegistry")
            .field("local_host", &self.local_host)
            .field("own_load", &own_load)
            .field("health", &self.health)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        registrations: Arc<dyn RegistrationStore>,
        config: RegistryConfig,
        local_host: impl Into<String>,
    ) -> Self {
        let health = HealthTracker::new(
            Arc::clone(&jobs),
            Arc::clone(&registrations),
            config.health.clone(),
        );
        Self {
            jobs,
            registrations,
            health,
            config,
            local_host: local_host.into(),
            local_load: Mutex::new(LocalLoadCache::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.jobs)
    }

    // ---- hosts ---------------------------------------------------------

    /// Registers `host` or refreshes an existing registration. Re-registering
    /// brings the host back online but keeps its active and maintenance
    /// flags.
    pub async fn register_host(
        &self,
        host: HostRegistration,
    ) -> Result<HostRegistration> {
        if host.base_url.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "host base url must not be blank".into(),
            ));
        }
        if host.max_load <= 0.0 {
            return Err(RegistryError::InvalidArgument(format!(
                "max load of {} must be positive",
                host.base_url
            )));
        }

        let registration = match self.registrations.host(&host.base_url).await? {
            Some(existing) => HostRegistration {
                online: true,
                active: existing.active,
                maintenance_mode: existing.maintenance_mode,
                ..host
            },
            None => HostRegistration {
                online: true,
                ..host
            },
        };
        self.registrations.save_host(&registration).await?;
        info!(
            target: "registry",
            host = %registration.base_url,
            max_load = registration.max_load,
            "host registered"
        );
        Ok(registration)
    }

    /// Marks the host offline and unregisters every service on it.
    pub async fn unregister_host(&self, base_url: &str) -> Result<()> {
        let mut host = self.require_host(base_url).await?;
        for service in self.registrations.services_on_host(base_url).await? {
            self.unregister_service(&service.service_type, base_url).await?;
        }
        host.online = false;
        self.registrations.save_host(&host).await?;
        info!(target: "registry", host = %base_url, "host unregistered");
        Ok(())
    }

    pub async fn set_maintenance(&self, base_url: &str, maintenance: bool) -> Result<()> {
        let mut host = self.require_host(base_url).await?;
        host.maintenance_mode = maintenance;
        self.registrations.save_host(&host).await?;
        for mut service in self.registrations.services_on_host(base_url).await? {
            service.maintenance_mode = maintenance;
            self.registrations.save_service(&service).await?;
        }
        info!(target: "registry", host = %base_url, maintenance, "maintenance mode changed");
        Ok(())
    }

    pub async fn enable_host(&self, base_url: &str) -> Result<()> {
        self.set_active(base_url, true).await
    }

    pub async fn disable_host(&self, base_url: &str) -> Result<()> {
        self.set_active(base_url, false).await
    }

    async fn set_active(&self, base_url: &str, active: bool) -> Result<()> {
        let mut host = self.require_host(base_url).await?;
        host.active = active;
        self.registrations.save_host(&host).await?;
        for mut service in self.registrations.services_on_host(base_url).await? {
            service.active = active;
            self.registrations.save_service(&service).await?;
        }
        info!(target: "registry", host = %base_url, active, "host availability changed");
        Ok(())
    }

    pub async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>> {
        self.registrations.host(base_url).await
    }

    pub async fn hosts(&self) -> Result<Vec<HostRegistration>> {
        self.registrations.hosts().await
    }

    pub async fn hosts_by_url(&self) -> Result<HashMap<String, HostRegistration>> {
        Ok(self
            .registrations
            .hosts()
            .await?
            .into_iter()
            .map(|host| (host.base_url.clone(), host))
            .collect())
    }

    async fn require_host(&self, base_url: &str) -> Result<HostRegistration> {
        self.registrations
            .host(base_url)
            .await?
            .ok_or_else(|| RegistryError::not_found(format!("host {base_url}")))
    }

    // ---- services ------------------------------------------------------

    /// Registers a service on an already registered host.
    ///
    /// A service that registers again has restarted, so whatever it was
    /// running is recovered before it comes back online.
    pub async fn register_service(
        &self,
        service_type: &str,
        base_url: &str,
        path: &str,
        job_producer: bool,
    ) -> Result<ServiceRegistration> {
        if service_type.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service type must not be blank".into(),
            ));
        }
        let host = self.require_host(base_url).await?;
        let key = ServiceKey::new(service_type, base_url);

        let registration = match self.registrations.service(&key).await? {
            Some(mut existing) => {
                self.recover_jobs(service_type, base_url).await?;
                existing.path = path.to_string();
                existing.job_producer = job_producer;
                existing.online = true;
                existing.online_from = Utc::now();
                existing.active = host.active;
                existing.maintenance_mode = host.maintenance_mode;
                existing
            }
            None => ServiceRegistration::new(&host, service_type, path, job_producer),
        };
        self.registrations.save_service(&registration).await?;
        info!(target: "registry", service = %key, path, "service registered");
        Ok(registration)
    }

    /// Takes the service offline and recovers the jobs it was processing.
    pub async fn unregister_service(&self, service_type: &str, base_url: &str) -> Result<()> {
        let key = ServiceKey::new(service_type, base_url);
        let mut service = self.require_service(&key).await?;
        service.online = false;
        self.registrations.save_service(&service).await?;
        let recovered = self.recover_jobs(service_type, base_url).await?;
        info!(target: "registry", service = %key, recovered, "service unregistered");
        Ok(())
    }

    /// Brings a service the heartbeat monitor took offline back online.
    pub async fn revive_service(&self, key: &ServiceKey) -> Result<()> {
        let mut service = self.require_service(key).await?;
        if !service.online {
            service.online = true;
            service.online_from = Utc::now();
            self.registrations.save_service(&service).await?;
            info!(target: "registry", service = %key, "service back online");
        }
        Ok(())
    }

    pub async fn service(&self, key: &ServiceKey) -> Result<Option<ServiceRegistration>> {
        self.registrations.service(key).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceRegistration>> {
        self.registrations.services().await
    }

    /// Every registration of `service_type`, whatever its state.
    pub async fn services_for(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        self.registrations.services_of_type(service_type).await
    }

    pub async fn services_on(&self, base_url: &str) -> Result<Vec<ServiceRegistration>> {
        self.registrations.services_on_host(base_url).await
    }

    async fn require_service(&self, key: &ServiceKey) -> Result<ServiceRegistration> {
        self.registrations
            .service(key)
            .await?
            .ok_or_else(|| RegistryError::not_found(format!("service {key}")))
    }

    /// Dispatch candidates for `service_type` against a load snapshot.
    pub async fn candidates(
        &self,
        service_type: &str,
        load: &SystemLoad,
        filter: &HostFilter,
        mode: SelectionMode,
    ) -> Result<Vec<ServiceRegistration>> {
        let hosts = self.hosts_by_url().await?;
        let services = self.registrations.services_of_type(service_type).await?;
        Ok(rank_candidates(services, &hosts, load, filter, mode))
    }

    pub async fn services_by_load(
        &self,
        service_type: &str,
        load: &SystemLoad,
    ) -> Result<Vec<ServiceRegistration>> {
        self.candidates(service_type, load, &HostFilter::Any, SelectionMode::ByLoad)
            .await
    }

    // ---- health --------------------------------------------------------

    /// Resets a service to NORMAL.
    pub async fn sanitize(&self, service_type: &str, base_url: &str) -> Result<ServiceRegistration> {
        self.health
            .sanitize(&ServiceKey::new(service_type, base_url))
            .await
    }

    pub async fn health_summary(&self) -> Result<HealthSummary> {
        let services = self.registrations.services().await?;
        Ok(HealthSummary::from_services(services.iter()))
    }

    // ---- load ----------------------------------------------------------

    /// Current load of every online host. Hosts without running work report
    /// zero; workflow jobs never count.
    pub async fn current_load(&self) -> Result<SystemLoad> {
        let sums = self
            .jobs
            .host_loads(&JobStatus::LOAD_INFLUENCING, TYPE_WORKFLOW)
            .await?;
        let mut load = SystemLoad::new();
        for host in self.registrations.hosts().await? {
            if !host.online {
                continue;
            }
            let current = sums.get(&host.base_url).copied().unwrap_or_default();
            load.add_node_load(NodeLoad::new(&host.base_url, current, host.max_load));
        }
        Ok(load)
    }

    /// Load factor per online host.
    pub async fn load_factors(&self) -> Result<BTreeMap<String, f32>> {
        Ok(self
            .current_load()
            .await?
            .nodes()
            .map(|node| (node.host.clone(), node.load_factor()))
            .collect())
    }

    pub async fn max_loads(&self) -> Result<BTreeMap<String, f32>> {
        Ok(self
            .registrations
            .hosts()
            .await?
            .into_iter()
            .filter(|host| host.online)
            .map(|host| (host.base_url, host.max_load))
            .collect())
    }

    pub async fn max_load_on(&self, base_url: &str) -> Result<f32> {
        Ok(self.require_host(base_url).await?.max_load)
    }

    /// Load of jobs running on this node, as tracked from job updates.
    pub fn own_load(&self) -> f32 {
        self.local_load
            .lock()
            .map(|cache| cache.load())
            .unwrap_or_default()
    }

    // ---- jobs ----------------------------------------------------------

    pub async fn create_job(&self, request: NewJob) -> Result<Job> {
        if request.job_type.trim().is_empty() {
            return Err(RegistryError::InvalidArgument("job type must not be blank".into()));
        }
        if request.operation.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "job operation must not be blank".into(),
            ));
        }
        let job_load = request.job_load.unwrap_or(self.config.jobs.default_job_load);
        if job_load < 0.0 {
            return Err(RegistryError::InvalidArgument(format!(
                "job load {job_load} must not be negative"
            )));
        }

        let key = ServiceKey::new(&request.job_type, &request.created_host);
        let creator_service = self.require_service(&key).await?;
        if creator_service.maintenance_mode || !creator_service.active {
            warn!(
                target: "registry",
                service = %key,
                "creating a job on a service that is in maintenance or inactive"
            );
        }

        if !self.config.dispatch.accept_job_loads_exceeding_max_load {
            let highest = self
                .max_loads()
                .await?
                .into_values()
                .fold(0.0_f32, f32::max);
            if job_load > highest {
                return Err(RegistryError::InvalidArgument(format!(
                    "job load {job_load} exceeds the largest host capacity {highest}"
                )));
            }
        }

        let (parent_job, root_job) = match request.parent {
            Some(parent_id) => {
                let parent = self.jobs.get(parent_id).await?;
                (Some(parent.id), Some(parent.root_job.unwrap_or(parent.id)))
            }
            None => (None, None),
        };

        let (status, processor_host) = if request.dispatchable {
            (JobStatus::Queued, None)
        } else {
            (JobStatus::Instantiated, Some(request.created_host.clone()))
        };

        let job = Job {
            id: JobId::new(),
            version: 0,
            job_type: request.job_type,
            operation: request.operation,
            arguments: request.arguments,
            payload: request.payload,
            status,
            failure_reason: FailureReason::None,
            dispatchable: request.dispatchable,
            job_load,
            creator: request.creator,
            organization: request.organization,
            created_host: request.created_host,
            processor_host,
            parent_job,
            root_job,
            date_created: Utc::now(),
            date_started: None,
            date_completed: None,
            queue_time_ms: None,
            run_time_ms: None,
        };
        let created = self.jobs.create(job).await?;
        debug!(
            target: "registry",
            job_id = %created.id,
            job_type = %created.job_type,
            operation = %created.operation,
            status = %created.status,
            "job created"
        );
        Ok(created)
    }

    pub async fn job(&self, id: JobId) -> Result<Job> {
        self.jobs.get(id).await
    }

    /// Persists `job` with an optimistic version check and applies the side
    /// effects of its status change.
    pub async fn update_job(&self, job: Job) -> Result<Job> {
        self.write_job(job, true).await
    }

    async fn write_job(&self, mut job: Job, track_health: bool) -> Result<Job> {
        let previous = self.jobs.get(job.id).await?;
        stamp_transition(&previous, &mut job);
        let stored = self.jobs.update(&job).await?;

        if let Ok(mut cache) = self.local_load.lock() {
            cache.observe(&stored, &self.local_host);
        }

        if track_health
            && previous.status != stored.status
            && !stored.is_workflow()
            && stored.processor_host.is_some()
            && let Err(err) = self.health.observe(&stored).await
        {
            warn!(
                target: "health",
                job_id = %stored.id,
                error = %err,
                "failed to record service health"
            );
        }
        Ok(stored)
    }

    /// Re-reads the job and applies `change` until the write lands or the
    /// attempts run out.
    async fn write_with_retry<F>(&self, id: JobId, track_health: bool, change: F) -> Result<Option<Job>>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut job = self.jobs.get(id).await?;
            if !change(&mut job) {
                return Ok(None);
            }
            match self.write_job(job, track_health).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(err) if err.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(target: "registry", job_id = %id, attempt, "retrying after version conflict");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Moves a QUEUED or RESTART job to DISPATCHING on `host`. Losing the
    /// version race means someone else claimed it.
    pub async fn claim_for_dispatch(&self, mut job: Job, host: &str) -> Result<Job> {
        job.status = JobStatus::Dispatching;
        job.processor_host = Some(host.to_string());
        let id = job.id;
        match self.update_job(job).await {
            Err(err) if err.is_conflict() => Err(RegistryError::Undispatchable(id)),
            other => other,
        }
    }

    /// All transitive children of the job.
    pub async fn child_jobs(&self, id: JobId) -> Result<Vec<Job>> {
        self.jobs.get(id).await?;
        self.jobs.descendants(id, Page::ALL).await
    }

    pub async fn jobs(&self, job_type: Option<&str>, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let filter = JobFilter {
            job_type: job_type.map(str::to_string),
            statuses: status.into_iter().collect(),
            ..JobFilter::default()
        };
        self.jobs.find(&filter, Page::ALL).await
    }

    pub async fn find_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        self.jobs.find(filter, page).await
    }

    /// Jobs that have not reached a terminal status.
    pub async fn active_jobs(&self) -> Result<Vec<Job>> {
        let active: Vec<JobStatus> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_active)
            .collect();
        self.jobs.find(&JobFilter::with_status(&active), Page::ALL).await
    }

    pub async fn count(&self, filter: &JobFilter) -> Result<u64> {
        self.jobs.count(filter).await
    }

    /// Jobs of `job_type` in `status` grouped by processor host.
    pub async fn count_by_host(
        &self,
        job_type: &str,
        status: JobStatus,
    ) -> Result<BTreeMap<String, u64>> {
        let filter = JobFilter::with_status(&[status]).job_type(job_type);
        let mut counts = BTreeMap::new();
        for job in self.jobs.find(&filter, Page::ALL).await? {
            if let Some(host) = job.processor_host {
                *counts.entry(host).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Jobs of `job_type` in `status` grouped by operation.
    pub async fn count_by_operation(
        &self,
        job_type: &str,
        status: JobStatus,
    ) -> Result<BTreeMap<String, u64>> {
        let filter = JobFilter::with_status(&[status]).job_type(job_type);
        let mut counts = BTreeMap::new();
        for job in self.jobs.find(&filter, Page::ALL).await? {
            *counts.entry(job.operation).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Cancels the job after cancelling every descendant still active.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job> {
        self.jobs.get(id).await?;
        let descendants = self.jobs.descendants(id, Page::ALL).await?;
        for child in descendants.iter().rev() {
            self.cancel_one(child.id).await?;
        }
        match self.cancel_one(id).await? {
            Some(job) => Ok(job),
            None => self.jobs.get(id).await,
        }
    }

    async fn cancel_one(&self, id: JobId) -> Result<Option<Job>> {
        let cancelled = self
            .write_with_retry(id, true, |job| {
                if job.status.is_terminated() {
                    return false;
                }
                job.status = JobStatus::Canceled;
                true
            })
            .await?;
        if cancelled.is_some() {
            debug!(target: "registry", job_id = %id, "job canceled");
        }
        Ok(cancelled)
    }

    /// Deletes the jobs together with their descendants.
    pub async fn remove_jobs(&self, ids: &[JobId]) -> Result<u64> {
        let mut doomed = Vec::new();
        for id in ids {
            self.jobs.get(*id).await?;
            let descendants = self.jobs.descendants(*id, Page::ALL).await?;
            // Children first so parent references never dangle mid-delete.
            doomed.extend(descendants.into_iter().rev().map(|job| job.id));
            doomed.push(*id);
        }
        doomed.dedup();
        let removed = self.jobs.delete(&doomed).await?;
        info!(target: "registry", removed, "jobs removed");
        Ok(removed)
    }

    /// Purges terminated root jobs completed more than `lifetime_days` ago.
    /// Workflow runs are left alone.
    pub async fn remove_parentless_jobs(&self, lifetime_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(lifetime_days));
        let filter = JobFilter {
            statuses: vec![JobStatus::Finished, JobStatus::Failed, JobStatus::Canceled],
            parentless: true,
            completed_before: Some(cutoff),
            ..JobFilter::default()
        };
        let ids: Vec<JobId> = self
            .jobs
            .find(&filter, Page::ALL)
            .await?
            .into_iter()
            .filter(|job| !job.is_workflow_run())
            .map(|job| job.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.remove_jobs(&ids).await
    }

    /// Cancels non-dispatchable INSTANTIATED/RUNNING jobs processed on
    /// `base_url`. Run at node start-up: whatever the node was doing
    /// synchronously died with the previous process.
    pub async fn cancel_orphaned_jobs(&self, base_url: &str) -> Result<usize> {
        let filter = JobFilter {
            statuses: vec![JobStatus::Instantiated, JobStatus::Running],
            processor_host: Some(base_url.to_string()),
            dispatchable: Some(false),
            ..JobFilter::default()
        };
        let mut cancelled = 0;
        for job in self.jobs.find(&filter, Page::ALL).await? {
            if self.cancel_one(job.id).await?.is_some() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(target: "registry", host = %base_url, cancelled, "orphaned jobs canceled");
        }
        Ok(cancelled)
    }

    /// Recovers work left on a service that went away. Dispatchable jobs
    /// are restarted elsewhere after their descendants are canceled;
    /// everything else fails.
    async fn recover_jobs(&self, service_type: &str, base_url: &str) -> Result<usize> {
        let filter = JobFilter::processing_on(service_type, base_url, &JobStatus::RECOVERABLE);
        let lost = self.jobs.find(&filter, Page::ALL).await?;
        let mut recovered = 0;

        for job in lost {
            if job.dispatchable {
                let descendants = self.jobs.descendants(job.id, Page::ALL).await?;
                for child in descendants.iter().rev() {
                    self.cancel_one(child.id).await?;
                }
                let restarted = self
                    .write_with_retry(job.id, false, |job| {
                        if !JobStatus::RECOVERABLE.contains(&job.status) {
                            return false;
                        }
                        job.status = JobStatus::Restart;
                        job.processor_host = None;
                        true
                    })
                    .await?;
                if restarted.is_some() {
                    info!(
                        target: "registry",
                        job_id = %job.id,
                        host = %base_url,
                        "job marked for restart"
                    );
                    recovered += 1;
                }
            } else {
                let failed = self
                    .write_with_retry(job.id, false, |job| {
                        if !JobStatus::RECOVERABLE.contains(&job.status) {
                            return false;
                        }
                        job.status = JobStatus::Failed;
                        true
                    })
                    .await?;
                if failed.is_some() {
                    warn!(
                        target: "registry",
                        job_id = %job.id,
                        host = %base_url,
                        "non-dispatchable job failed with its service"
                    );
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }
}

/// Applies the timestamp rules for the transition from `previous` to `job`.
fn stamp_transition(previous: &Job, job: &mut Job) {
    if previous.status == job.status {
        return;
    }
    let now = Utc::now();
    match job.status {
        JobStatus::Running if previous.status != JobStatus::Waiting => {
            if job.date_started.is_none() {
                job.date_started = Some(now);
                job.queue_time_ms = Some((now - job.date_created).num_milliseconds());
            }
        }
        JobStatus::Failed => {
            job.date_completed = Some(now);
            if let Some(started) = job.date_started {
                job.run_time_ms = Some((now - started).num_milliseconds());
            }
        }
        JobStatus::Finished => {
            let started = *job.date_started.get_or_insert(job.date_created);
            job.date_completed = Some(now);
            job.run_time_ms = Some((now - started).num_milliseconds());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn registry() -> ServiceRegistry {
        let store = Arc::new(InMemoryStore::new());
        let registry = ServiceRegistry::new(
            store.clone(),
            store,
            RegistryConfig::default(),
            "http://local",
        );
        registry
            .register_host(HostRegistration::new("http://local", "127.0.0.1", "local", 0, 4, 4.0))
            .await
            .unwrap();
        registry
            .register_service("encode", "http://local", "/encode", true)
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn create_job_requires_registered_creator() {
        let registry = registry().await;
        let err = registry
            .create_job(NewJob::new("inspect", "run", "http://local", "admin", "default"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let job = registry
            .create_job(NewJob::new("encode", "run", "http://local", "admin", "default"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.job_load, 0.1);
        assert!(job.processor_host.is_none());
    }

    #[tokio::test]
    async fn non_dispatchable_job_runs_where_created() {
        let registry = registry().await;
        let job = registry
            .create_job(
                NewJob::new("encode", "run", "http://local", "admin", "default").not_dispatchable(),
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Instantiated);
        assert_eq!(job.processor_host.as_deref(), Some("http://local"));
    }

    #[tokio::test]
    async fn blank_operation_and_negative_load_are_rejected() {
        let registry = registry().await;
        let blank = registry
            .create_job(NewJob::new("encode", " ", "http://local", "admin", "default"))
            .await;
        assert!(matches!(blank, Err(RegistryError::InvalidArgument(_))));

        let negative = registry
            .create_job(
                NewJob::new("encode", "run", "http://local", "admin", "default").with_load(-1.0),
            )
            .await;
        assert!(matches!(negative, Err(RegistryError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn child_links_to_root_of_parent() {
        let registry = registry().await;
        let root = registry
            .create_job(NewJob::new("encode", "run", "http://local", "admin", "default"))
            .await
            .unwrap();
        let child = registry
            .create_job(
                NewJob::new("encode", "run", "http://local", "admin", "default").with_parent(root.id),
            )
            .await
            .unwrap();
        let grandchild = registry
            .create_job(
                NewJob::new("encode", "run", "http://local", "admin", "default").with_parent(child.id),
            )
            .await
            .unwrap();
        assert_eq!(child.root_job, Some(root.id));
        assert_eq!(grandchild.parent_job, Some(child.id));
        assert_eq!(grandchild.root_job, Some(root.id));
    }

    #[tokio::test]
    async fn timestamps_follow_transitions() {
        let registry = registry().await;
        let mut job = registry
            .create_job(NewJob::new("encode", "run", "http://local", "admin", "default"))
            .await
            .unwrap();

        job.status = JobStatus::Running;
        job.processor_host = Some("http://local".into());
        let running = registry.update_job(job).await.unwrap();
        assert!(running.date_started.is_some());
        assert!(running.queue_time_ms.is_some());
        assert!((registry.own_load() - 0.1).abs() < f32::EPSILON);

        let mut finishing = running;
        finishing.status = JobStatus::Finished;
        let finished = registry.update_job(finishing).await.unwrap();
        assert!(finished.date_completed.is_some());
        assert!(finished.run_time_ms.is_some());
        assert_eq!(registry.own_load(), 0.0);
    }

    #[tokio::test]
    async fn finished_without_start_uses_creation_time() {
        let registry = registry().await;
        let mut job = registry
            .create_job(NewJob::new("encode", "run", "http://local", "admin", "default"))
            .await
            .unwrap();
        job.status = JobStatus::Finished;
        let finished = registry.update_job(job).await.unwrap();
        assert_eq!(finished.date_started, Some(finished.date_created));
    }

    #[tokio::test]
    async fn re_registering_host_keeps_maintenance() {
        let registry = registry().await;
        registry.set_maintenance("http://local", true).await.unwrap();
        let again = registry
            .register_host(HostRegistration::new("http://local", "127.0.0.1", "local", 0, 4, 8.0))
            .await
            .unwrap();
        assert!(again.maintenance_mode);
        assert_eq!(again.max_load, 8.0);
        let service = registry
            .service(&ServiceKey::new("encode", "http://local"))
            .await
            .unwrap()
            .unwrap();
        assert!(service.maintenance_mode);
    }
}
