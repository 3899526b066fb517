use std::{fmt, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{dispatch::JobDispatcher, heartbeat::HeartbeatMonitor};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Owns the periodic dispatcher and heartbeat tasks.
pub struct RegistryRuntime {
    dispatcher: Arc<JobDispatcher>,
    heartbeat: Arc<HeartbeatMonitor>,
    dispatch_interval: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for RegistryRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("RegistryRuntime")
            .field("dispatch_interval", &self.dispatch_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl RegistryRuntime {
    /// `None` intervals leave the respective task disabled.
    pub fn new(
        dispatcher: Arc<JobDispatcher>,
        heartbeat: Arc<HeartbeatMonitor>,
        dispatch_interval: Option<Duration>,
        heartbeat_interval: Option<Duration>,
    ) -> Self {
        Self {
            dispatcher,
            heartbeat,
            dispatch_interval,
            heartbeat_interval,
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;

        match self.dispatch_interval {
            Some(period) => {
                let dispatcher = Arc::clone(&self.dispatcher);
                let shutdown = self.shutdown_token.clone();
                handles.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                tracing::info!(target: "dispatch", "dispatcher shutting down");
                                break;
                            }
                            _ = ticker.tick() => {
                                if let Err(err) = dispatcher.run_cycle().await {
                                    tracing::warn!(target: "dispatch", error = %err, "dispatch cycle failed");
                                }
                            }
                        }
                    }
                }));
                tracing::info!(target: "dispatch", ?period, "dispatcher started");
            }
            None => tracing::info!(target: "dispatch", "dispatching disabled"),
        }

        match self.heartbeat_interval {
            Some(period) => {
                let monitor = Arc::clone(&self.heartbeat);
                let shutdown = self.shutdown_token.clone();
                handles.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // The first tick completes immediately; give services a
                    // full period to come up before the first probe.
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                tracing::info!(target: "heartbeat", "heartbeat monitor shutting down");
                                break;
                            }
                            _ = ticker.tick() => {
                                if let Err(err) = monitor.run_once().await {
                                    tracing::warn!(target: "heartbeat", error = %err, "heartbeat round failed");
                                }
                            }
                        }
                    }
                }));
                tracing::info!(target: "heartbeat", ?period, "heartbeat monitor started");
            }
            None => tracing::info!(target: "heartbeat", "heartbeat monitor disabled"),
        }
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown of registry runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Registry task failed: {:?}", e),
                Err(_) => tracing::warn!("Registry task timed out during shutdown"),
            }
        }
        tracing::info!("Registry runtime shutdown complete");
    }
}
