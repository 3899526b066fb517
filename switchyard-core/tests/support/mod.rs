//! Shared fixtures for registry integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use switchyard_core::{
    DispatchContext, HostRegistration, InMemoryStore, JobDispatcher, NewJob, RegistryConfig,
    ServiceRegistry, StaticDirectory,
    dispatch::{DispatchRequest, DispatchResponse, WorkerClient},
    error::{RegistryError, Result},
};
use switchyard_model::{JobId, concat_url};

pub const LOCAL: &str = "http://registry:8080";
pub const HOST_A: &str = "http://a:8080";
pub const HOST_B: &str = "http://b:8080";
pub const ENCODE: &str = "org.example.encode";
pub const ENCODE_PATH: &str = "/encode/";
pub const ORG: &str = "acme";

pub fn dispatch_url(host: &str) -> String {
    concat_url(&[host, ENCODE_PATH, "dispatch"])
}

/// Worker transport answering from a script. URLs without a script accept
/// every dispatch and answer every probe.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    dispatch_script: Mutex<HashMap<String, VecDeque<DispatchResponse>>>,
    fallback: Mutex<HashMap<String, DispatchResponse>>,
    alive: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<(String, JobId)>>,
    probes: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers the next dispatch to `url` with `response`.
    pub fn queue(&self, url: &str, response: DispatchResponse) {
        self.dispatch_script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    /// Answers every unscripted dispatch to `url` with `response`.
    pub fn always(&self, url: &str, response: DispatchResponse) {
        self.fallback
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_alive(&self, url: &str, alive: bool) {
        self.alive.lock().unwrap().insert(url.to_string(), alive);
    }

    pub fn calls(&self) -> Vec<(String, JobId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, job: JobId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, id)| *id == job)
            .map(|(url, _)| url)
            .collect()
    }

    pub fn probe_count(&self, url: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .filter(|probed| probed.as_str() == url)
            .count()
    }
}

#[async_trait]
impl WorkerClient for ScriptedClient {
    async fn dispatch(
        &self,
        url: &str,
        request: &DispatchRequest,
        _context: &DispatchContext,
    ) -> Result<DispatchResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), request.job_id));
        let scripted = self
            .dispatch_script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let response = scripted.or_else(|| self.fallback.lock().unwrap().get(url).cloned());
        Ok(response.unwrap_or(DispatchResponse::Accepted))
    }

    async fn probe(&self, url: &str) -> Result<bool> {
        self.probes.lock().unwrap().push(url.to_string());
        match self.alive.lock().unwrap().get(url) {
            Some(true) | None => Ok(true),
            Some(false) => Err(RegistryError::ServiceUnavailable(url.to_string())),
        }
    }
}

/// In-memory cluster with an encoding service on each worker host. Jobs are
/// created by the service on the first host.
pub struct Cluster {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<ServiceRegistry>,
    pub client: Arc<ScriptedClient>,
    pub dispatcher: JobDispatcher,
    creator: String,
}

impl Cluster {
    pub async fn new(hosts: &[(&str, f32)]) -> Self {
        Self::with_config(hosts, RegistryConfig::default()).await
    }

    pub async fn with_config(hosts: &[(&str, f32)], config: RegistryConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ServiceRegistry::new(
            store.clone(),
            store.clone(),
            config,
            LOCAL,
        ));
        for (index, (host, max_load)) in hosts.iter().enumerate() {
            registry
                .register_host(HostRegistration::new(
                    *host,
                    format!("10.0.1.{index}"),
                    format!("worker-{index}"),
                    8 << 30,
                    4,
                    *max_load,
                ))
                .await
                .unwrap();
            registry
                .register_service(ENCODE, host, ENCODE_PATH, true)
                .await
                .unwrap();
        }

        let client = ScriptedClient::new();
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            Arc::new(StaticDirectory::permissive([ORG])),
            client.clone(),
        );

        Self {
            store,
            registry,
            client,
            dispatcher,
            creator: hosts.first().map(|(host, _)| host.to_string()).unwrap_or_default(),
        }
    }

    pub fn new_job(&self, operation: &str) -> NewJob {
        NewJob::new(ENCODE, operation, self.creator.as_str(), "admin", ORG)
    }

    pub async fn submit(&self, operation: &str, load: f32) -> switchyard_model::Job {
        self.registry
            .create_job(self.new_job(operation).with_load(load))
            .await
            .unwrap()
    }
}
