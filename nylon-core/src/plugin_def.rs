use serde::{Deserialize, Serialize};

/// How the host reaches a plugin's phase handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Transport {
    Ffi {
        file_path: String,
    },
    Messaging {
        bus_ref: String,
        queue_group: String,
        #[serde(default)]
        per_phase: PhaseOverrides,
    },
}

/// Per-phase messaging overrides, falling back to the smart defaults table
/// when a phase is not listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOverrides {
    #[serde(default)]
    pub request_filter: Option<PhasePolicy>,
    #[serde(default)]
    pub response_filter: Option<PhasePolicy>,
    #[serde(default)]
    pub response_body_filter: Option<PhasePolicy>,
    #[serde(default)]
    pub logging: Option<PhasePolicy>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Retry,
    Continue,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePolicy {
    pub timeout_ms: u64,
    pub on_error: OnError,
    pub retries: u32,
}

impl PhasePolicy {
    /// The smart defaults table from the plugin registry design.
    pub fn default_for(phase: crate::session::Phase) -> Self {
        use crate::session::Phase::*;
        match phase {
            RequestFilter => PhasePolicy { timeout_ms: 5000, on_error: OnError::Retry, retries: 3 },
            ResponseFilter => PhasePolicy { timeout_ms: 3000, on_error: OnError::Continue, retries: 2 },
            ResponseBodyFilter => PhasePolicy { timeout_ms: 3000, on_error: OnError::Continue, retries: 2 },
            Logging => PhasePolicy { timeout_ms: 200, on_error: OnError::Continue, retries: 1 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_initial_ms() -> u64 {
    50
}
fn default_backoff_max_ms() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: default_max_retries(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// A named, uniquely identified plugin and the transport the host uses to
/// reach it. Referenced by name from `MiddlewareStep::Call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub name: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default)]
    pub initial_config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingBus {
    pub name: String,
    pub servers: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u32,
    pub subject_prefix: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_max_inflight() -> u32 {
    1024
}

impl PluginDefinition {
    pub fn phase_policy(&self, phase: crate::session::Phase) -> PhasePolicy {
        if let Transport::Messaging { per_phase, .. } = &self.transport {
            use crate::session::Phase::*;
            let override_ = match phase {
                RequestFilter => &per_phase.request_filter,
                ResponseFilter => &per_phase.response_filter,
                ResponseBodyFilter => &per_phase.response_body_filter,
                Logging => &per_phase.logging,
            };
            if let Some(p) = override_ {
                return p.clone();
            }
        }
        PhasePolicy::default_for(phase)
    }
}
