//! Persistence ports for jobs and registrations.
//!
//! The registry only talks to these traits. `InMemoryStore` backs tests and
//! single-node deployments; `PostgresStore` is available with the `database`
//! feature.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use switchyard_model::{
    HostRegistration, Job, JobId, JobStatus, ServiceKey, ServiceRegistration,
};

use crate::error::Result;

mod memory;
#[cfg(feature = "database")]
mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "database")]
pub use postgres::PostgresStore;

/// Offset pagination. A `limit` of `None` returns everything after `offset`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub const ALL: Page = Page {
        offset: 0,
        limit: None,
    };

    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// Conjunction of optional predicates over jobs. Empty fields match anything.
///
/// Results are ordered by creation time, then id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobFilter {
    pub ids: Option<Vec<JobId>>,
    pub statuses: Vec<JobStatus>,
    pub job_type: Option<String>,
    pub operation: Option<String>,
    pub processor_host: Option<String>,
    pub parent_job: Option<JobId>,
    pub parentless: bool,
    pub dispatchable: Option<bool>,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn with_status(statuses: &[JobStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    /// Dispatchable jobs in `status`, the dispatcher's scan predicate.
    pub fn dispatchable_with_status(status: JobStatus) -> Self {
        Self {
            statuses: vec![status],
            dispatchable: Some(true),
            ..Self::default()
        }
    }

    /// Jobs of `job_type` processed on `host` in any of `statuses`.
    pub fn processing_on(
        job_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Self {
        Self {
            statuses: statuses.to_vec(),
            job_type: Some(job_type.to_string()),
            processor_host: Some(host.to_string()),
            ..Self::default()
        }
    }

    /// Jobs among `ids` that are still waiting to be dispatched.
    pub fn ready_among(ids: Vec<JobId>) -> Self {
        Self {
            ids: Some(ids),
            statuses: JobStatus::READY.to_vec(),
            ..Self::default()
        }
    }

    pub fn children_of(parent: JobId) -> Self {
        Self {
            parent_job: Some(parent),
            ..Self::default()
        }
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&job.id)
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&job.status) {
            return false;
        }
        if let Some(job_type) = &self.job_type
            && &job.job_type != job_type
        {
            return false;
        }
        if let Some(operation) = &self.operation
            && &job.operation != operation
        {
            return false;
        }
        if let Some(host) = &self.processor_host
            && job.processor_host.as_ref() != Some(host)
        {
            return false;
        }
        if let Some(parent) = self.parent_job
            && job.parent_job != Some(parent)
        {
            return false;
        }
        if self.parentless && job.parent_job.is_some() {
            return false;
        }
        if let Some(dispatchable) = self.dispatchable
            && job.dispatchable != dispatchable
        {
            return false;
        }
        if let Some(after) = self.completed_after
            && job.date_completed.is_none_or(|done| done < after)
        {
            return false;
        }
        if let Some(before) = self.completed_before
            && job.date_completed.is_none_or(|done| done >= before)
        {
            return false;
        }
        true
    }
}

/// Durable record of jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job. The stored copy starts at version 1.
    async fn create(&self, job: Job) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Job>;

    /// Writes `job` if the stored version still equals `job.version` and
    /// returns the stored copy with its bumped version. Fails with
    /// `RegistryError::Conflict` otherwise.
    async fn update(&self, job: &Job) -> Result<Job>;

    /// Deletes the given jobs. Returns how many existed.
    async fn delete(&self, ids: &[JobId]) -> Result<u64>;

    async fn find(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>>;

    async fn count(&self, filter: &JobFilter) -> Result<u64>;

    /// All transitive children of `id`, parents before their children.
    async fn descendants(&self, id: JobId, page: Page) -> Result<Vec<Job>>;

    /// Summed job load per processor host over jobs in `statuses`, leaving
    /// out jobs of `excluded_type`.
    async fn host_loads(
        &self,
        statuses: &[JobStatus],
        excluded_type: &str,
    ) -> Result<HashMap<String, f32>>;
}

/// Durable record of hosts and services.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>>;

    async fn hosts(&self) -> Result<Vec<HostRegistration>>;

    /// Inserts or replaces the host keyed by `base_url`.
    async fn save_host(&self, host: &HostRegistration) -> Result<()>;

    async fn service(&self, key: &ServiceKey)
    -> Result<Option<ServiceRegistration>>;

    async fn services(&self) -> Result<Vec<ServiceRegistration>>;

    /// Inserts or replaces the service keyed by `(service_type, host)`.
    async fn save_service(&self, service: &ServiceRegistration) -> Result<()>;

    async fn services_of_type(
        &self,
        service_type: &str,
    ) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .filter(|s| s.service_type == service_type)
            .collect())
    }

    async fn services_on_host(
        &self,
        host: &str,
    ) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .filter(|s| s.host == host)
            .collect())
    }
}
