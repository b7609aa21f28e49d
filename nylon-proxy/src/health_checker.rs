//! Health Checker: periodically probes each `http` service's endpoints and
//! keeps their `HealthState` atomics current. `pingora_load_balancing`'s own
//! `HttpHealthCheck` (wired up in `load_balancer.rs`) is what actually keeps
//! a dead backend out of `UpstreamPool::select`; this module exists
//! alongside it to satisfy the atomics-not-locks status-exposure
//! requirement, independent of the load balancer's internal bookkeeping, so
//! `/metrics` and the admin surface can report per-endpoint status without
//! reaching into pingora internals.

use nylon_core::upstream::{Endpoint, HealthCheckConfig, HealthState};
use nylon_observability::MetricsCollector;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::interval;

#[derive(Clone, Default)]
pub struct HealthRegistry {
    states: Arc<HashMap<String, Vec<(Endpoint, Arc<HealthState>)>>>,
}

impl HealthRegistry {
    pub fn build(services: &HashMap<String, (Vec<Endpoint>, HealthCheckConfig)>) -> Self {
        let mut states = HashMap::new();
        for (name, (endpoints, _hc)) in services {
            let entries = endpoints
                .iter()
                .map(|e| (e.clone(), Arc::new(HealthState::new())))
                .collect();
            states.insert(name.clone(), entries);
        }
        Self { states: Arc::new(states) }
    }

    pub fn status_of(&self, service: &str, endpoint: &Endpoint) -> Option<nylon_core::upstream::HealthStatus> {
        self.states
            .get(service)?
            .iter()
            .find(|(e, _)| e.addr() == endpoint.addr())
            .map(|(_, state)| state.status())
    }

    /// Spawns one probing task per service; the returned handles are
    /// detached and run for the lifetime of the process (cancelled only by
    /// the tokio runtime shutting down).
    pub fn spawn_probes(&self, services: &HashMap<String, (Vec<Endpoint>, HealthCheckConfig)>, metrics: Arc<MetricsCollector>) {
        for (name, (_endpoints, hc)) in services {
            if !hc.enabled {
                continue;
            }
            let Some(entries) = self.states.get(name).cloned() else { continue };
            let interval_dur = nylon_core::upstream::parse_duration_suffixed(&hc.interval)
                .unwrap_or(Duration::from_secs(10));
            let timeout_dur = nylon_core::upstream::parse_duration_suffixed(&hc.timeout)
                .unwrap_or(Duration::from_secs(3));
            let healthy_threshold = hc.healthy_threshold;
            let unhealthy_threshold = hc.unhealthy_threshold;
            let path = hc.path.clone();
            let service_name = name.clone();
            let metrics = Arc::clone(&metrics);

            tokio::spawn(async move {
                let mut ticker = interval(interval_dur);
                loop {
                    ticker.tick().await;
                    for (endpoint, state) in &entries {
                        let success = probe_http(&endpoint.addr(), &path, timeout_dur).await;
                        let before = state.status();
                        state.record(success, healthy_threshold, unhealthy_threshold);
                        let after = state.status();
                        if before != after {
                            tracing::info!(
                                service = %service_name,
                                endpoint = %endpoint.addr(),
                                status = ?after,
                                "endpoint health transitioned"
                            );
                            metrics.record_health_transition(
                                &service_name,
                                &endpoint.addr(),
                                after == nylon_core::upstream::HealthStatus::Healthy,
                            );
                        }
                    }
                }
            });
        }
    }
}

/// Issues a plain HTTP/1.1 GET to `path` and counts a `[200,400)` response
/// as success, per the active-check contract. Connection failures, a
/// response that can't be parsed, and the timeout itself all count as
/// failure.
async fn probe_http(addr: &str, path: &str, timeout: Duration) -> bool {
    let path = if path.is_empty() { "/" } else { path };
    let outcome = tokio::time::timeout(timeout, async move {
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
        let mut response = Vec::with_capacity(512);
        stream.read_to_end(&mut response).await?;
        Ok::<Vec<u8>, std::io::Error>(response)
    })
    .await;

    match outcome {
        Ok(Ok(response)) => status_code(&response).map(|s| (200..400).contains(&s)).unwrap_or(false),
        _ => false,
    }
}

/// Parses the status code out of an HTTP/1.1 response's status line
/// (`HTTP/1.1 200 OK`). Anything that doesn't look like one is not a
/// healthy response.
fn status_code(response: &[u8]) -> Option<u16> {
    let line = response.split(|&b| b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?.trim();
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_initializes_unknown_status_for_every_endpoint() {
        let mut services = HashMap::new();
        services.insert(
            "svc".to_string(),
            (vec![Endpoint { ip: "127.0.0.1".into(), port: 1, weight: 1 }], HealthCheckConfig::default()),
        );
        let registry = HealthRegistry::build(&services);
        let status = registry
            .status_of("svc", &Endpoint { ip: "127.0.0.1".into(), port: 1, weight: 1 })
            .unwrap();
        assert_eq!(status, nylon_core::upstream::HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn probe_http_fails_fast_against_a_closed_port() {
        let ok = probe_http("127.0.0.1:1", "/", Duration::from_millis(200)).await;
        assert!(!ok);
    }

    #[test]
    fn status_code_reads_the_status_line() {
        assert_eq!(status_code(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"), Some(200));
        assert_eq!(status_code(b"HTTP/1.1 503 Service Unavailable\r\n\r\n"), Some(503));
        assert_eq!(status_code(b"not an http response"), None);
    }

    #[test]
    fn success_range_excludes_4xx_and_5xx() {
        assert!((200..400).contains(&200));
        assert!((200..400).contains(&399));
        assert!(!(200..400).contains(&400));
        assert!(!(200..400).contains(&500));
    }
}
