//! Structured per-request access logging. Emitted at `info` through
//! `tracing` rather than a bespoke JSON exporter — the `tracing-subscriber`
//! layer installed by `logging::init` decides the final sink and format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub request_id: String,
    pub route_host: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: f64,
    pub client_ip: String,
    pub upstream_addr: Option<String>,
}

impl AccessLogEntry {
    pub fn log(&self) {
        tracing::info!(
            request_id = %self.request_id,
            route_host = self.route_host.as_deref().unwrap_or("-"),
            method = %self.method,
            path = %self.path,
            status = self.status,
            latency_ms = self.latency_ms,
            client_ip = %self.client_ip,
            upstream_addr = self.upstream_addr.as_deref().unwrap_or("-"),
            "request completed"
        );
    }
}
