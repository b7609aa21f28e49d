use crate::plugin_def::{MessagingBus, PluginDefinition};
use crate::route::{MiddlewareStep, Route};
use crate::service::Service;
use crate::tls::TlsEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level runtime configuration: listeners, ACME, the pingora engine
/// knobs, the websocket hub, and the messaging bus list. Loaded once at
/// startup from the file named by `-c`/`NYLON_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub http: Vec<String>,
    #[serde(default)]
    pub https: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Address the websocket hub's own TCP listener binds. A route whose
    /// middleware chain ends in an upgrade is proxied here like any other
    /// HTTP upstream, since pingora's proxy hooks forward a 101 response
    /// transparently but do not terminate the protocol themselves.
    #[serde(default = "default_ws_listen")]
    pub ws_listen: String,
    #[serde(default)]
    pub config_dir: Option<String>,
    #[serde(default)]
    pub acme: Option<AcmeConfig>,
    #[serde(default)]
    pub pingora: PingoraConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub messaging: Vec<MessagingBus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingoraConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub work_stealing: bool,
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout_seconds: u64,
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
}

fn default_ws_listen() -> String {
    "127.0.0.1:9400".into()
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_graceful_shutdown_timeout() -> u64 {
    30
}

fn default_grace_period() -> u64 {
    5
}

impl Default for PingoraConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            work_stealing: false,
            graceful_shutdown_timeout_seconds: default_graceful_shutdown_timeout(),
            grace_period_seconds: default_grace_period(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum WebSocketConfig {
    Memory,
    Redis {
        host: String,
        port: u16,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        db: u8,
        key_prefix: String,
    },
    Cluster {
        nodes: Vec<String>,
        key_prefix: String,
    },
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig::Memory
    }
}

/// Proxy configuration: the fragments loaded from `config_dir`, shallow-
/// merged list-by-list across files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub header_selector: Option<String>,
    #[serde(default)]
    pub plugins: Vec<PluginDefinition>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub middleware_groups: HashMap<String, Vec<MiddlewareStep>>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub tls: Vec<TlsEntry>,
}

impl ProxyConfig {
    /// Shallow-merge `other` into `self`: list fields are concatenated,
    /// map fields are extended (later file wins on key collision).
    pub fn merge(&mut self, mut other: ProxyConfig) {
        self.plugins.append(&mut other.plugins);
        self.services.append(&mut other.services);
        self.routes.append(&mut other.routes);
        self.tls.append(&mut other.tls);
        self.middleware_groups.extend(other.middleware_groups);
        if other.header_selector.is_some() {
            self.header_selector = other.header_selector;
        }
    }

    /// Expand `MiddlewareStep::Group` references inline. Groups do not
    /// reference other groups (validated, not recursively expanded).
    pub fn expand_groups(&self, steps: &[MiddlewareStep]) -> Result<Vec<MiddlewareStep>, String> {
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                MiddlewareStep::Group { name } => {
                    let group = self
                        .middleware_groups
                        .get(name)
                        .ok_or_else(|| format!("unknown middleware group: {name}"))?;
                    for inner in group {
                        if matches!(inner, MiddlewareStep::Group { .. }) {
                            return Err(format!("group '{name}' references another group; groups cannot nest"));
                        }
                        out.push(inner.clone());
                    }
                }
                call => out.push(call.clone()),
            }
        }
        Ok(out)
    }

    /// Validate invariant I1 (dangling refs fail startup), I2 (disjoint
    /// TLS domain sets), and that every `http` service's health check
    /// interval/timeout carries a unit suffix. I3 (one transport per
    /// plugin) holds structurally since `Transport` is a single enum
    /// field.
    pub fn validate(&self) -> Result<(), String> {
        let service_names: std::collections::HashSet<&str> =
            self.services.iter().map(|s| s.name()).collect();
        let plugin_names: std::collections::HashSet<&str> =
            self.plugins.iter().map(|p| p.name.as_str()).collect();

        if plugin_names.len() != self.plugins.len() {
            return Err("duplicate plugin name in config".into());
        }
        if service_names.len() != self.services.len() {
            return Err("duplicate service name in config".into());
        }

        for route in &self.routes {
            self.validate_steps(&route.middleware, &plugin_names)?;
            for path in &route.paths {
                if !service_names.contains(path.service_ref.as_str()) {
                    return Err(format!("route references unknown service: {}", path.service_ref));
                }
                self.validate_steps(&path.middleware, &plugin_names)?;
            }
        }

        for service in &self.services {
            if let Service::Http { name, hc, .. } = service {
                crate::upstream::parse_duration_suffixed(&hc.interval)
                    .map_err(|e| format!("service '{name}' health check interval: {e}"))?;
                crate::upstream::parse_duration_suffixed(&hc.timeout)
                    .map_err(|e| format!("service '{name}' health check timeout: {e}"))?;
            }
        }

        let mut seen_domains = std::collections::HashSet::new();
        for tls in &self.tls {
            for domain in &tls.domains {
                if !seen_domains.insert(domain.clone()) {
                    return Err(format!("domain '{domain}' appears in more than one tls entry"));
                }
            }
        }

        Ok(())
    }

    fn validate_steps(
        &self,
        steps: &[MiddlewareStep],
        plugin_names: &std::collections::HashSet<&str>,
    ) -> Result<(), String> {
        for step in steps {
            match step {
                MiddlewareStep::Group { name } => {
                    if !self.middleware_groups.contains_key(name) {
                        return Err(format!("unknown middleware group: {name}"));
                    }
                }
                MiddlewareStep::Call { plugin, .. } => {
                    if !plugin_names.contains(plugin.as_str()) {
                        return Err(format!("middleware references unknown plugin: {plugin}"));
                    }
                }
            }
        }
        Ok(())
    }
}
