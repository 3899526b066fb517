//! Data model shared by the Switchyard registry, dispatcher and API.
//!
//! Nothing in here performs I/O. The types describe jobs, the hosts and
//! services they run on, and the load snapshots the dispatcher sorts by.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod job;
pub mod load;
pub mod registration;

pub use error::{ModelError, Result as ModelResult};
pub use ids::JobId;
pub use job::{
    FailureReason, Job, JobSignature, JobStatus, RESUME, START_OPERATION,
    START_WORKFLOW, TYPE_WORKFLOW,
};
pub use load::{NodeLoad, SystemLoad};
pub use registration::{
    HostRegistration, ServiceKey, ServiceRegistration, ServiceState,
};

/// Joins URL fragments with exactly one slash between them.
pub fn concat_url(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.trim_matches('/').is_empty()) {
        if out.is_empty() {
            out.push_str(part.trim_end_matches('/'));
        } else {
            out.push('/');
            out.push_str(part.trim_matches('/'));
        }
    }
    out
}
