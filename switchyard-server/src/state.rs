use std::{fmt, sync::Arc};

use switchyard_core::{JobDispatcher, ServiceRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    /// Present when the node runs a dispatcher; exposes the priority list.
    pub dispatcher: Option<Arc<JobDispatcher>>,
}

impl AppState {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("local_host", &self.registry.local_host())
            .field("dispatcher", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}
