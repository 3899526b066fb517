use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::{error::ModelError, ids::JobId};

/// Job type of workflow runs. These jobs manage their own concurrency and are
/// kept out of host load accounting and health tracking.
pub const TYPE_WORKFLOW: &str = "org.switchyard.workflow";

/// Operations that represent a workflow run rather than a unit of media work.
pub const START_WORKFLOW: &str = "START_WORKFLOW";
pub const START_OPERATION: &str = "START_OPERATION";
pub const RESUME: &str = "RESUME";

/// Lifecycle of a job.
///
/// `Queued` and `Restart` are the two states the dispatcher scans for.
/// `Restart` marks recovered work and is always dispatched ahead of `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum JobStatus {
    Instantiated,
    Queued,
    Dispatching,
    Running,
    Paused,
    Waiting,
    Finished,
    Failed,
    Canceled,
    Restart,
}

impl JobStatus {
    pub const ALL: [JobStatus; 10] = [
        JobStatus::Instantiated,
        JobStatus::Queued,
        JobStatus::Dispatching,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Waiting,
        JobStatus::Finished,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Restart,
    ];

    /// Statuses whose job load counts against the processing host.
    pub const LOAD_INFLUENCING: [JobStatus; 1] = [JobStatus::Running];

    /// Statuses the dispatcher picks work from.
    pub const READY: [JobStatus; 2] = [JobStatus::Restart, JobStatus::Queued];

    /// Statuses of work that is lost when its processing service disappears.
    pub const RECOVERABLE: [JobStatus; 3] =
        [JobStatus::Running, JobStatus::Dispatching, JobStatus::Waiting];

    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminated()
    }

    pub fn influences_load(&self) -> bool {
        Self::LOAD_INFLUENCING.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Instantiated => "INSTANTIATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Dispatching => "DISPATCHING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Waiting => "WAITING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
            JobStatus::Restart => "RESTART",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::InvalidStatus(s.to_string()))
    }
}

/// Why a job ended up `Failed`. Only processing failures count against the
/// health of the service that ran the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum FailureReason {
    #[default]
    None,
    Data,
    Processing,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::None => "NONE",
            FailureReason::Data => "DATA",
            FailureReason::Processing => "PROCESSING",
        }
    }

    /// `None` is treated as a processing failure: the worker did not tell us
    /// the input was bad.
    pub fn affects_service_health(&self) -> bool {
        !matches!(self, FailureReason::Data)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(FailureReason::None),
            "DATA" => Ok(FailureReason::Data),
            "PROCESSING" => Ok(FailureReason::Processing),
            _ => Err(ModelError::InvalidFailureReason(s.to_string())),
        }
    }
}

/// Identity of "the same piece of work" across services: type, operation and
/// arguments. Used to correlate repeated failures for health decisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct JobSignature(pub String);

impl JobSignature {
    pub fn compute(job_type: &str, operation: &str, arguments: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(job_type.as_bytes());
        hasher.update([0x1f]);
        hasher.update(operation.as_bytes());
        for argument in arguments {
            hasher.update([0x1e]);
            hasher.update(argument.as_bytes());
        }
        let digest = hasher.finalize();
        JobSignature(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work tracked through its status lifecycle.
///
/// `arguments` and `payload` belong to the worker and are never interpreted by
/// the registry. `version` is bumped by the store on every successful update
/// and must match on the next one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Job {
    pub id: JobId,
    pub version: i64,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub job_type: String,
    pub operation: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub arguments: Vec<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub payload: Option<String>,
    pub status: JobStatus,
    #[cfg_attr(feature = "serde", serde(default))]
    pub failure_reason: FailureReason,
    pub dispatchable: bool,
    pub job_load: f32,
    pub creator: String,
    pub organization: String,
    /// Host of the service that created the job.
    pub created_host: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub processor_host: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent_job: Option<JobId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub root_job: Option<JobId>,
    pub date_created: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub date_started: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub date_completed: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub queue_time_ms: Option<i64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub run_time_ms: Option<i64>,
}

impl Job {
    pub fn signature(&self) -> JobSignature {
        JobSignature::compute(&self.job_type, &self.operation, &self.arguments)
    }

    /// Key used by the dispatcher to remember `type@operation` pairs that
    /// found no capacity during a cycle.
    pub fn dispatch_key(&self) -> String {
        format!("{}@{}", self.job_type, self.operation)
    }

    pub fn is_workflow(&self) -> bool {
        self.job_type == TYPE_WORKFLOW
    }

    pub fn is_workflow_run(&self) -> bool {
        matches!(
            self.operation.as_str(),
            START_WORKFLOW | START_OPERATION | RESUME
        )
    }

    pub fn is_processed_on(&self, host: &str) -> bool {
        self.processor_host.as_deref() == Some(host)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job {}", self.id)
    }
}
