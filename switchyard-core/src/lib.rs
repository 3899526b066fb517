//! # Switchyard Core
//!
//! Job dispatching and service registry for a cluster of worker hosts.
//!
//! ## Overview
//!
//! - **Job store**: persistent jobs with optimistic versioning, filtered
//!   queries and parent/child trees ([`store`])
//! - **Registry**: hosts, services, cluster load and failover recovery
//!   ([`registry`])
//! - **Health**: per-service NORMAL / WARNING / ERROR state driven by job
//!   outcomes ([`health`])
//! - **Dispatcher**: periodic matching of ready jobs to the least loaded
//!   eligible service ([`dispatch`])
//! - **Heartbeat**: liveness probing with two-strike unregistration
//!   ([`heartbeat`])
//!
//! ## Feature Flags
//!
//! - `database`: enables the PostgreSQL store and embedded migrations
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchyard_core::{
//!     HostRegistration,
//!     config::RegistryConfig,
//!     registry::{NewJob, ServiceRegistry},
//!     store::InMemoryStore,
//! };
//!
//! # async fn example() -> switchyard_core::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let registry = ServiceRegistry::new(
//!     store.clone(),
//!     store,
//!     RegistryConfig::default(),
//!     "http://10.0.0.1:8080",
//! );
//! registry
//!     .register_host(HostRegistration::new(
//!         "http://10.0.0.1:8080",
//!         "10.0.0.1",
//!         "node-a",
//!         16 << 30,
//!         8,
//!         4.0,
//!     ))
//!     .await?;
//! registry
//!     .register_service("org.example.encode", "http://10.0.0.1:8080", "/encode/", true)
//!     .await?;
//! let job = registry
//!     .create_job(NewJob::new(
//!         "org.example.encode",
//!         "encode",
//!         "http://10.0.0.1:8080",
//!         "admin",
//!         "acme",
//!     ))
//!     .await?;
//! println!("queued {}", job.id);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod identity;
pub mod registry;
pub mod runtime;
pub mod store;

pub use config::RegistryConfig;
pub use dispatch::{HttpWorkerClient, JobDispatcher, WorkerClient};
pub use error::{RegistryError, Result};
pub use health::{HealthOutcome, HealthSummary, HealthTracker};
pub use heartbeat::{HeartbeatMonitor, HeartbeatReport};
pub use identity::{DispatchContext, IdentityDirectory, StaticDirectory};
pub use registry::{NewJob, ServiceRegistry};
pub use runtime::RegistryRuntime;
pub use switchyard_model::{HostRegistration, Job, JobId, JobStatus, ServiceRegistration};

pub use store::{InMemoryStore, JobFilter, JobStore, Page, RegistrationStore};

#[cfg(feature = "database")]
pub use store::PostgresStore;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
