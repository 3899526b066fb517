use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex},
};

use switchyard_model::{
    FailureReason, HostRegistration, Job, JobId, JobStatus, ServiceRegistration,
    SystemLoad,
};
use tracing::{debug, info, warn};

use crate::{
    config::DispatchConfig,
    error::{RegistryError, Result},
    identity::{DispatchContext, IdentityDirectory},
    registry::{HostFilter, SelectionMode, ServiceRegistry, rank_candidates},
    store::{JobFilter, JobStore, Page},
};

use super::client::{DispatchRequest, DispatchResponse, WorkerClient};

/// Counters for one dispatch cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub dispatched: usize,
    /// Attempted without success and put back to QUEUED.
    pub requeued: usize,
    pub rejected: usize,
    /// Claimed by another dispatcher first.
    pub lost_races: usize,
    /// Not attempted: exhausted type, unknown identity or no candidates.
    pub skipped: usize,
}

/// State shared by the batches of one cycle.
#[derive(Debug, Default)]
struct CycleState {
    /// `type@operation` keys that found no capacity this cycle.
    exhausted: HashSet<String>,
    seen: HashSet<JobId>,
    report: CycleReport,
}

/// Where a job ended up after one pass through `dispatch_batch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Untouched,
    Requeued,
    Gone,
}

/// Matches ready jobs to the least loaded capable service.
pub struct JobDispatcher {
    registry: Arc<ServiceRegistry>,
    jobs: Arc<dyn JobStore>,
    identities: Arc<dyn IdentityDirectory>,
    client: Arc<dyn WorkerClient>,
    config: DispatchConfig,
    /// Job id to the host its next attempt is pinned to.
    priority: Mutex<HashMap<JobId, String>>,
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pinned = self
            .priority
            .try_lock()
            .map(|list| list.len())
            .unwrap_or_default();
        f.debug_struct("JobDispatcher")
            .field("config", &self.config)
            .field("pinned_jobs", &pinned)
            .field("client", &std::any::type_name_of_val(self.client.as_ref()))
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        identities: Arc<dyn IdentityDirectory>,
        client: Arc<dyn WorkerClient>,
    ) -> Self {
        let jobs = registry.job_store();
        let config = registry.config().dispatch.clone();
        Self {
            registry,
            jobs,
            identities,
            client,
            config,
            priority: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the priority list.
    pub fn priority_list(&self) -> HashMap<JobId, String> {
        self.priority
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    fn pinned_host(&self, id: JobId) -> Option<String> {
        self.priority.lock().ok()?.get(&id).cloned()
    }

    fn pin(&self, id: JobId, host: String) {
        if let Ok(mut list) = self.priority.lock() {
            list.insert(id, host);
        }
    }

    fn unpin(&self, id: JobId) {
        if let Ok(mut list) = self.priority.lock() {
            list.remove(&id);
        }
    }

    /// Hosts pinned by other jobs are off limits. A pinned job keeps its own
    /// host and may still use any unpinned one.
    fn host_filter(&self, id: JobId) -> HostFilter {
        let Ok(list) = self.priority.lock() else {
            return HostFilter::Any;
        };
        let own = list.get(&id);
        let reserved: Vec<String> = list
            .values()
            .filter(|host| Some(*host) != own)
            .cloned()
            .collect();
        if reserved.is_empty() {
            HostFilter::Any
        } else {
            HostFilter::Excluding(reserved)
        }
    }

    /// Drops priority entries whose job is no longer waiting for dispatch.
    async fn refresh_priority_list(&self) -> Result<()> {
        let ids: Vec<JobId> = match self.priority.lock() {
            Ok(list) if !list.is_empty() => list.keys().copied().collect(),
            _ => return Ok(()),
        };
        let ready: HashSet<JobId> = self
            .jobs
            .find(&JobFilter::ready_among(ids), Page::ALL)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();
        if let Ok(mut list) = self.priority.lock() {
            let before = list.len();
            list.retain(|id, _| ready.contains(id));
            if list.len() != before {
                debug!(
                    target: "dispatch",
                    dropped = before - list.len(),
                    "priority list cleaned"
                );
            }
        }
        Ok(())
    }

    /// One pass over all ready jobs: RESTART before QUEUED, workflow jobs
    /// after everything else.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.refresh_priority_list().await?;

        let mut state = CycleState::default();
        let mut held_back = Vec::new();
        let batch_size = self.config.batch_size.max(1);

        for status in JobStatus::READY {
            let filter = JobFilter::dispatchable_with_status(status);
            let mut offset = 0;
            loop {
                let page = self.jobs.find(&filter, Page::new(offset, batch_size)).await?;
                if page.is_empty() {
                    break;
                }
                let last_page = page.len() < batch_size;
                let (workflows, regular): (Vec<Job>, Vec<Job>) =
                    page.into_iter().partition(Job::is_workflow);
                // Held-back jobs keep their status for now, so they still
                // occupy a slot in the scan.
                offset += workflows.len();
                held_back.extend(workflows);

                let outcomes = self.dispatch_batch(regular, &mut state).await?;
                offset += outcomes
                    .iter()
                    .filter(|outcome| match outcome {
                        Outcome::Untouched => true,
                        Outcome::Requeued => status == JobStatus::Queued,
                        Outcome::Gone => false,
                    })
                    .count();
                if last_page {
                    break;
                }
            }
        }

        if !held_back.is_empty() {
            self.dispatch_batch(held_back, &mut state).await?;
        }

        let report = state.report;
        if report.dispatched + report.requeued + report.rejected > 0 {
            info!(
                target: "dispatch",
                dispatched = report.dispatched,
                requeued = report.requeued,
                rejected = report.rejected,
                lost_races = report.lost_races,
                skipped = report.skipped,
                "dispatch cycle complete"
            );
        }
        Ok(report)
    }

    async fn dispatch_batch(
        &self,
        jobs: Vec<Job>,
        state: &mut CycleState,
    ) -> Result<Vec<Outcome>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let mut load = self.registry.current_load().await?;
        let hosts = self.registry.hosts_by_url().await?;
        let mut services: HashMap<String, Vec<ServiceRegistration>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            let outcome = self
                .dispatch_one(job, &mut load, &hosts, &mut services, state)
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn dispatch_one(
        &self,
        job: Job,
        load: &mut SystemLoad,
        hosts: &HashMap<String, HostRegistration>,
        services: &mut HashMap<String, Vec<ServiceRegistration>>,
        state: &mut CycleState,
    ) -> Result<Outcome> {
        if !state.seen.insert(job.id) {
            return Ok(Outcome::Untouched);
        }

        let key = job.dispatch_key();
        let pinned = self.pinned_host(job.id);
        if pinned.is_none() && state.exhausted.contains(&key) {
            debug!(target: "dispatch", job_id = %job.id, key = %key, "no capacity left this cycle");
            state.report.skipped += 1;
            return Ok(Outcome::Untouched);
        }

        let context = match self
            .identities
            .context_for(&job.organization, &job.creator)
            .await
        {
            Ok(Some(context)) => context,
            Ok(None) => {
                warn!(
                    target: "dispatch",
                    job_id = %job.id,
                    organization = %job.organization,
                    creator = %job.creator,
                    "skipping job with unknown organization or creator"
                );
                state.report.skipped += 1;
                return Ok(Outcome::Untouched);
            }
            Err(err) => {
                warn!(target: "dispatch", job_id = %job.id, error = %err, "identity lookup failed");
                state.report.skipped += 1;
                return Ok(Outcome::Untouched);
            }
        };

        let mode = self.selection_mode(&job).await?;
        if !services.contains_key(&job.job_type) {
            let registered = self.registry.services_for(&job.job_type).await?;
            services.insert(job.job_type.clone(), registered);
        }
        let registered = services.get(&job.job_type).cloned().unwrap_or_default();
        let eligible = rank_candidates(
            registered,
            hosts,
            load,
            &self.host_filter(job.id),
            SelectionMode::ByLoad,
        );

        // A job heavier than every eligible host can only go to the largest
        // ones, busy or not.
        let oversized = job.job_load > highest_max_load(&eligible, load);
        let candidates: Vec<ServiceRegistration> = match mode {
            SelectionMode::WithCapacity if !oversized => eligible
                .into_iter()
                .filter(|service| {
                    load.get(&service.host)
                        .is_none_or(|node| node.load_factor() < 1.0)
                })
                .collect(),
            _ => eligible,
        };

        if candidates.is_empty() {
            debug!(
                target: "dispatch",
                job_id = %job.id,
                job_type = %job.job_type,
                "no service with capacity"
            );
            if !job.is_workflow() {
                state.exhausted.insert(key);
            }
            state.report.skipped += 1;
            return Ok(Outcome::Untouched);
        }

        match self.dispatch_job(&job, &candidates, &context, load).await {
            Ok(host) => {
                if let Err(err) = load.update_node_load(&host, job.job_load) {
                    debug!(target: "dispatch", host = %host, error = %err, "host missing from load snapshot");
                }
                self.unpin(job.id);
                state.report.dispatched += 1;
                Ok(Outcome::Gone)
            }
            Err(RegistryError::ServiceUnavailable(_)) => {
                if !job.is_workflow() {
                    state.exhausted.insert(key);
                }
                state.report.requeued += 1;
                Ok(Outcome::Requeued)
            }
            Err(RegistryError::Undispatchable(id)) => {
                debug!(target: "dispatch", job_id = %id, "job claimed by another dispatcher");
                state.report.lost_races += 1;
                Ok(Outcome::Gone)
            }
            Err(RegistryError::JobRejected { .. }) => {
                state.report.rejected += 1;
                Ok(Outcome::Gone)
            }
            Err(RegistryError::NotFound(what)) => {
                debug!(target: "dispatch", job_id = %job.id, missing = %what, "job vanished during dispatch");
                Ok(Outcome::Gone)
            }
            Err(err) => Err(err),
        }
    }

    /// Children whose siblings are not running yet may fan out onto busy
    /// hosts. Everything else needs headroom.
    async fn selection_mode(&self, job: &Job) -> Result<SelectionMode> {
        let Some(parent) = job.parent_job else {
            return Ok(SelectionMode::WithCapacity);
        };
        if job.is_workflow() {
            return Ok(SelectionMode::WithCapacity);
        }
        let running_siblings = self
            .jobs
            .count(&JobFilter::children_of(parent).statuses(&[JobStatus::Running]))
            .await?;
        Ok(if running_siblings > 0 {
            SelectionMode::WithCapacity
        } else {
            SelectionMode::ByLoad
        })
    }

    /// Offers `job` to `candidates` in order and returns the host that
    /// accepted it.
    ///
    /// Each attempt first claims the job as DISPATCHING on the candidate. A
    /// lost claim ends the attempt with `Undispatchable`; a rejection fails the
    /// job; a busy or unreachable worker moves on to the next candidate. When
    /// nobody accepts, the job goes back to QUEUED and `ServiceUnavailable`
    /// is returned.
    pub async fn dispatch_job(
        &self,
        job: &Job,
        candidates: &[ServiceRegistration],
        context: &DispatchContext,
        load: &SystemLoad,
    ) -> Result<String> {
        if candidates.is_empty() {
            return Err(RegistryError::ServiceUnavailable(job.job_type.clone()));
        }

        let highest = highest_max_load(candidates, load);
        let attempts: Vec<&ServiceRegistration> = if job.job_load > highest {
            candidates
                .iter()
                .filter(|service| max_load_of(service, load) >= highest)
                .collect()
        } else {
            candidates.iter().collect()
        };

        let request = DispatchRequest {
            job_id: job.id,
            operation: job.operation.clone(),
        };
        let mut current = job.clone();
        let mut last_host: Option<String> = None;

        for service in attempts {
            current = self
                .registry
                .claim_for_dispatch(current, &service.host)
                .await?;
            last_host = Some(service.host.clone());

            let url = service.dispatch_url();
            match self.client.dispatch(&url, &request, context).await {
                Ok(DispatchResponse::Accepted) => {
                    info!(
                        target: "dispatch",
                        job_id = %job.id,
                        job_type = %job.job_type,
                        operation = %job.operation,
                        host = %service.host,
                        "job dispatched"
                    );
                    return Ok(service.host.clone());
                }
                Ok(DispatchResponse::Busy) => {
                    debug!(target: "dispatch", job_id = %job.id, host = %service.host, "service busy");
                }
                Ok(DispatchResponse::Rejected(reason)) => {
                    warn!(
                        target: "dispatch",
                        job_id = %job.id,
                        host = %service.host,
                        reason = %reason,
                        "job rejected by service"
                    );
                    current.status = JobStatus::Failed;
                    current.failure_reason = FailureReason::Data;
                    if let Err(err) = self.registry.update_job(current).await {
                        warn!(target: "dispatch", job_id = %job.id, error = %err, "failed to record rejection");
                    }
                    return Err(RegistryError::JobRejected {
                        id: job.id,
                        host: service.host.clone(),
                        reason,
                    });
                }
                Ok(DispatchResponse::NotReachable) => {
                    debug!(target: "dispatch", job_id = %job.id, host = %service.host, "dispatch endpoint not reachable");
                }
                Ok(DispatchResponse::Unexpected(status)) => {
                    warn!(
                        target: "dispatch",
                        job_id = %job.id,
                        host = %service.host,
                        status,
                        "unexpected dispatch response"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "dispatch",
                        job_id = %job.id,
                        host = %service.host,
                        error = %err,
                        "dispatch call failed"
                    );
                }
            }
        }

        if self.config.accept_job_loads_exceeding_max_load
            && !job.is_workflow()
            && let Some(host) = last_host
        {
            debug!(target: "dispatch", job_id = %job.id, host = %host, "pinning job for next cycle");
            self.pin(job.id, host);
        }

        current.status = JobStatus::Queued;
        current.processor_host = None;
        match self.registry.update_job(current).await {
            Ok(_) => Err(RegistryError::ServiceUnavailable(job.job_type.clone())),
            Err(err) if err.is_conflict() => Err(RegistryError::Undispatchable(job.id)),
            Err(err) => Err(err),
        }
    }
}

fn max_load_of(service: &ServiceRegistration, load: &SystemLoad) -> f32 {
    load.get(&service.host)
        .map(|node| node.max_load)
        .unwrap_or_default()
}

fn highest_max_load(services: &[ServiceRegistration], load: &SystemLoad) -> f32 {
    services
        .iter()
        .map(|service| max_load_of(service, load))
        .fold(0.0, f32::max)
}
