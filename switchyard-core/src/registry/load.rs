use std::collections::HashMap;

use switchyard_model::{Job, JobId};
use tracing::warn;

/// Running load of jobs processed by this node, maintained from job updates
/// instead of a store query.
#[derive(Debug, Default)]
pub struct LocalLoadCache {
    contributions: HashMap<JobId, f32>,
    load: f32,
}

impl LocalLoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> f32 {
        self.load
    }

    pub fn tracked_jobs(&self) -> usize {
        self.contributions.len()
    }

    /// Folds the latest state of `job` into the counter.
    pub fn observe(&mut self, job: &Job, local_host: &str) {
        if job.is_workflow() || job.job_load <= 0.0 {
            return;
        }

        if job.status.influences_load() && job.is_processed_on(local_host) {
            if !self.contributions.contains_key(&job.id) {
                self.contributions.insert(job.id, job.job_load);
                self.load += job.job_load;
            }
        } else if let Some(load) = self.contributions.remove(&job.id) {
            self.load -= load;
        }

        if self.contributions.is_empty() && self.load != 0.0 {
            warn!(
                target: "registry",
                drift = self.load,
                "local load counter drifted with no running jobs, resetting"
            );
            self.load = 0.0;
        }
    }
}
