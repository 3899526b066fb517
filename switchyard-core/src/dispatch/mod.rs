//! Periodic matching of ready jobs to worker services.

mod client;
mod dispatcher;

pub use client::{
    DispatchRequest, DispatchResponse, HttpWorkerClient, ORGANIZATION_HEADER,
    USER_HEADER, WorkerClient,
};
pub use dispatcher::{CycleReport, JobDispatcher};
