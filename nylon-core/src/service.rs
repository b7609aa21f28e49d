use crate::upstream::{Endpoint, HealthCheckConfig, LbAlgorithm};
use serde::{Deserialize, Serialize};

/// A named, reusable request target. A route's path refers to a service by
/// name; the service determines whether the request is proxied upstream,
/// handed to a plugin wholesale, or served from the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Service {
    Http {
        name: String,
        endpoints: Vec<Endpoint>,
        #[serde(default)]
        algorithm: LbAlgorithm,
        #[serde(default)]
        hc: HealthCheckConfig,
        /// Template evaluated against the request to derive the consistent-hash key.
        #[serde(default)]
        hash_key: Option<String>,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    Plugin {
        name: String,
        plugin: String,
        entry: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Static {
        name: String,
        root: String,
        #[serde(default = "default_index")]
        index: String,
        #[serde(default)]
        spa: bool,
    },
}

fn default_max_retries() -> u32 {
    1
}

fn default_index() -> String {
    "index.html".into()
}

impl Service {
    pub fn name(&self) -> &str {
        match self {
            Service::Http { name, .. } => name,
            Service::Plugin { name, .. } => name,
            Service::Static { name, .. } => name,
        }
    }
}
