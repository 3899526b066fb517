use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest period either periodic task may run at.
pub const MIN_INTERVAL_SECS: u64 = 1;

/// Global knobs for the registry, the dispatcher and the heartbeat monitor.
///
/// Every field carries a default so a deployment only spells out what it
/// wants to change.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub dispatch: DispatchConfig,
    pub heartbeat: HeartbeatConfig,
    pub health: HealthConfig,
    pub jobs: JobDefaults,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds between dispatch cycles. `0` disables the dispatcher.
    pub interval_secs: u64,
    /// Page size of the RESTART and QUEUED scans.
    pub batch_size: usize,
    /// Whether the fleet accepts jobs heavier than any single host's max load.
    pub accept_job_loads_exceeding_max_load: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            batch_size: 100,
            accept_job_loads_exceeding_max_load: true,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    /// `None` when dispatching is disabled.
    pub fn interval(&self) -> Option<Duration> {
        clamp_interval(self.interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between liveness probes. `0` disables the monitor.
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Option<Duration> {
        clamp_interval(self.interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Failures a WARNING service must have accumulated before it enters ERROR.
    pub max_attempts_before_error: u32,
    pub error_states_enabled: bool,
    /// Service types that stop at WARNING.
    pub no_error_state_service_types: Vec<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_attempts_before_error: 1,
            error_states_enabled: true,
            no_error_state_service_types: Vec::new(),
        }
    }
}

impl HealthConfig {
    pub fn allows_error_state(&self, service_type: &str) -> bool {
        self.error_states_enabled
            && !self
                .no_error_state_service_types
                .iter()
                .any(|t| t == service_type)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobDefaults {
    /// Load assigned to jobs created without one.
    pub default_job_load: f32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            default_job_load: 0.1,
        }
    }
}

fn clamp_interval(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        s => Some(Duration::from_secs(s.max(MIN_INTERVAL_SECS))),
    }
}
