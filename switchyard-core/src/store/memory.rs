use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use switchyard_model::{
    HostRegistration, Job, JobId, JobStatus, ServiceKey, ServiceRegistration,
};
use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};

use super::{JobFilter, JobStore, Page, RegistrationStore};

/// Process-local store with secondary indexes by status, type and parent.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: RwLock<JobTable>,
    hosts: RwLock<BTreeMap<String, HostRegistration>>,
    services: RwLock<BTreeMap<ServiceKey, ServiceRegistration>>,
}

#[derive(Debug, Default)]
struct JobTable {
    rows: HashMap<JobId, Job>,
    by_status: HashMap<JobStatus, HashSet<JobId>>,
    by_type: HashMap<String, HashSet<JobId>>,
    by_parent: HashMap<JobId, Vec<JobId>>,
}

impl JobTable {
    fn index(&mut self, job: &Job) {
        self.by_status.entry(job.status).or_default().insert(job.id);
        self.by_type
            .entry(job.job_type.clone())
            .or_default()
            .insert(job.id);
        if let Some(parent) = job.parent_job {
            let children = self.by_parent.entry(parent).or_default();
            if !children.contains(&job.id) {
                children.push(job.id);
            }
        }
    }

    fn unindex(&mut self, job: &Job) {
        if let Some(set) = self.by_status.get_mut(&job.status) {
            set.remove(&job.id);
        }
        if let Some(set) = self.by_type.get_mut(&job.job_type) {
            set.remove(&job.id);
        }
        if let Some(parent) = job.parent_job
            && let Some(children) = self.by_parent.get_mut(&parent)
        {
            children.retain(|id| *id != job.id);
        }
    }

    /// Narrowest candidate set the indexes can offer for `filter`.
    fn candidates(&self, filter: &JobFilter) -> Vec<&Job> {
        let ids: Vec<JobId> = if let Some(ids) = &filter.ids {
            ids.clone()
        } else if let Some(parent) = filter.parent_job {
            self.by_parent.get(&parent).cloned().unwrap_or_default()
        } else if !filter.statuses.is_empty() {
            filter
                .statuses
                .iter()
                .filter_map(|status| self.by_status.get(status))
                .flatten()
                .copied()
                .collect()
        } else if let Some(job_type) = &filter.job_type {
            self.by_type
                .get(job_type)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        } else {
            return self.rows.values().collect();
        };
        ids.iter().filter_map(|id| self.rows.get(id)).collect()
    }

    fn select(&self, filter: &JobFilter) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .candidates(filter)
            .into_iter()
            .filter(|job| filter.matches(job))
            .collect();
        jobs.sort_by(|a, b| {
            a.date_created.cmp(&b.date_created).then(a.id.cmp(&b.id))
        });
        jobs.dedup_by_key(|job| job.id);
        jobs
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    let items = items.skip(page.offset);
    match page.limit {
        Some(limit) => items.take(limit).collect(),
        None => items.collect(),
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, mut job: Job) -> Result<Job> {
        let mut table = self.jobs.write().await;
        if table.rows.contains_key(&job.id) {
            return Err(RegistryError::InvalidArgument(format!(
                "job {} already exists",
                job.id
            )));
        }
        job.version = 1;
        table.index(&job);
        table.rows.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        self.jobs
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(format!("job {id}")))
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let mut table = self.jobs.write().await;
        let stored = table
            .rows
            .get(&job.id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(format!("job {}", job.id)))?;
        if stored.version != job.version {
            return Err(RegistryError::Conflict {
                id: job.id,
                expected: job.version,
            });
        }
        let mut next = job.clone();
        next.version = stored.version + 1;
        table.unindex(&stored);
        table.index(&next);
        table.rows.insert(next.id, next.clone());
        Ok(next)
    }

    async fn delete(&self, ids: &[JobId]) -> Result<u64> {
        let mut table = self.jobs.write().await;
        let mut removed = 0;
        for id in ids {
            if let Some(job) = table.rows.remove(id) {
                table.unindex(&job);
                table.by_parent.remove(id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn find(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let table = self.jobs.read().await;
        Ok(paginate(
            table.select(filter).into_iter().cloned(),
            page,
        ))
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64> {
        let table = self.jobs.read().await;
        Ok(table.select(filter).len() as u64)
    }

    async fn descendants(&self, id: JobId, page: Page) -> Result<Vec<Job>> {
        let table = self.jobs.read().await;
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            let Some(children) = table.by_parent.get(&current) else {
                continue;
            };
            for child in children {
                if seen.insert(*child)
                    && let Some(job) = table.rows.get(child)
                {
                    out.push(job.clone());
                    queue.push_back(*child);
                }
            }
        }
        Ok(paginate(out.into_iter(), page))
    }

    async fn host_loads(
        &self,
        statuses: &[JobStatus],
        excluded_type: &str,
    ) -> Result<HashMap<String, f32>> {
        let table = self.jobs.read().await;
        let mut loads: HashMap<String, f32> = HashMap::new();
        for status in statuses {
            let Some(ids) = table.by_status.get(status) else {
                continue;
            };
            for job in ids.iter().filter_map(|id| table.rows.get(id)) {
                if job.job_type == excluded_type {
                    continue;
                }
                if let Some(host) = &job.processor_host {
                    *loads.entry(host.clone()).or_default() += job.job_load;
                }
            }
        }
        Ok(loads)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryStore {
    async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>> {
        Ok(self.hosts.read().await.get(base_url).cloned())
    }

    async fn hosts(&self) -> Result<Vec<HostRegistration>> {
        Ok(self.hosts.read().await.values().cloned().collect())
    }

    async fn save_host(&self, host: &HostRegistration) -> Result<()> {
        self.hosts
            .write()
            .await
            .insert(host.base_url.clone(), host.clone());
        Ok(())
    }

    async fn service(
        &self,
        key: &ServiceKey,
    ) -> Result<Option<ServiceRegistration>> {
        Ok(self.services.read().await.get(key).cloned())
    }

    async fn services(&self) -> Result<Vec<ServiceRegistration>> {
        Ok(self.services.read().await.values().cloned().collect())
    }

    async fn save_service(&self, service: &ServiceRegistration) -> Result<()> {
        self.services
            .write()
            .await
            .insert(service.key(), service.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use switchyard_model::FailureReason;

    use super::*;

    fn job(job_type: &str, status: JobStatus, parent: Option<JobId>) -> Job {
        Job {
            id: JobId::new(),
            version: 0,
            job_type: job_type.to_string(),
            operation: "run".to_string(),
            arguments: Vec::new(),
            payload: None,
            status,
            failure_reason: FailureReason::None,
            dispatchable: true,
            job_load: 1.0,
            creator: "admin".to_string(),
            organization: "default".to_string(),
            created_host: "http://a".to_string(),
            processor_host: None,
            parent_job: parent,
            root_job: parent,
            date_created: Utc::now(),
            date_started: None,
            date_completed: None,
            queue_time_ms: None,
            run_time_ms: None,
        }
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryStore::new();
        let created = store
            .create(job("encode", JobStatus::Queued, None))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let mut first = created.clone();
        first.status = JobStatus::Dispatching;
        let updated = store.update(&first).await.unwrap();
        assert_eq!(updated.version, 2);

        let mut second = created;
        second.status = JobStatus::Dispatching;
        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn status_index_follows_updates() {
        let store = InMemoryStore::new();
        let created = store
            .create(job("encode", JobStatus::Queued, None))
            .await
            .unwrap();
        let queued = JobFilter::with_status(&[JobStatus::Queued]);
        assert_eq!(store.count(&queued).await.unwrap(), 1);

        let mut running = created;
        running.status = JobStatus::Running;
        store.update(&running).await.unwrap();
        assert_eq!(store.count(&queued).await.unwrap(), 0);
        assert_eq!(
            store
                .count(&JobFilter::with_status(&[JobStatus::Running]))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn descendants_are_transitive_and_paginated() {
        let store = InMemoryStore::new();
        let root = store
            .create(job("workflow", JobStatus::Running, None))
            .await
            .unwrap();
        let child = store
            .create(job("encode", JobStatus::Queued, Some(root.id)))
            .await
            .unwrap();
        let grandchild = store
            .create(job("inspect", JobStatus::Queued, Some(child.id)))
            .await
            .unwrap();

        let all = store.descendants(root.id, Page::ALL).await.unwrap();
        let ids: Vec<_> = all.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![child.id, grandchild.id]);

        let second = store.descendants(root.id, Page::new(1, 1)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, grandchild.id);
    }

    #[tokio::test]
    async fn host_loads_sum_running_jobs_only() {
        let store = InMemoryStore::new();
        let mut a = job("encode", JobStatus::Running, None);
        a.processor_host = Some("http://a".into());
        a.job_load = 1.5;
        let mut b = job("encode", JobStatus::Queued, None);
        b.processor_host = Some("http://a".into());
        let mut wf = job("workflow", JobStatus::Running, None);
        wf.processor_host = Some("http://a".into());
        for j in [a, b, wf] {
            store.create(j).await.unwrap();
        }

        let loads = store
            .host_loads(&[JobStatus::Running], "workflow")
            .await
            .unwrap();
        assert_eq!(loads.get("http://a"), Some(&1.5));
    }
}
