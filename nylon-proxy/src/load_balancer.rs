//! Load Balancer: turns an `http` service's endpoint list into a
//! `pingora_load_balancing` backend set and selects one per request
//! according to the configured algorithm.

use nylon_core::error::NylonError;
use nylon_core::upstream::{Endpoint, HealthCheckConfig, LbAlgorithm};
use pingora_core::protocols::l4::socket::SocketAddr;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_load_balancing::health_check::HttpHealthCheck;
use pingora_load_balancing::selection::{
    algorithms::{Random, RoundRobin},
    consistent::KetamaHashing,
    weighted::Weighted,
};
use pingora_load_balancing::{discovery, Backend, Backends, Extensions, LoadBalancer};
use pingora_load_balancing::selection::BackendSelection;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// The four selection algorithms the spec names, each backed by its own
/// `pingora_load_balancing::LoadBalancer` instantiation — the generic
/// selection policy is a compile-time type parameter there, not a runtime
/// value, so the enum is the seam between the two worlds.
#[derive(Clone)]
pub enum UpstreamPool {
    RoundRobin(Arc<LoadBalancer<Weighted<RoundRobin>>>),
    Weighted(Arc<LoadBalancer<Weighted<fnv::FnvHasher>>>),
    Consistent(Arc<LoadBalancer<KetamaHashing>>),
    Random(Arc<LoadBalancer<Weighted<Random>>>),
}

impl UpstreamPool {
    /// Builds the backend set for one `Service::Http` and runs the initial
    /// discovery pass. `hash_key` selection happens per request in the
    /// proxy's `upstream_peer` hook; this only wires up the pool itself.
    pub async fn build(
        service_name: &str,
        endpoints: &[Endpoint],
        algorithm: LbAlgorithm,
        hc: &HealthCheckConfig,
    ) -> Result<Self, NylonError> {
        let mut backends: BTreeSet<Backend> = BTreeSet::new();
        for endpoint in endpoints {
            let addr_str = endpoint.addr();
            let addr: SocketAddr = addr_str
                .parse()
                .map_err(|e| NylonError::ConfigError(format!("{service_name}: bad endpoint {addr_str}: {e}")))?;
            let mut backend = Backend { addr, weight: endpoint.weight as usize, ext: Extensions::new() };
            backend.ext.insert::<HttpPeer>(HttpPeer::new(addr_str, false, String::new()));
            backends.insert(backend);
        }
        let discovery = discovery::Static::new(backends);
        let host_for_hc = endpoints.first().map(|e| e.ip.clone()).unwrap_or_else(|| "127.0.0.1".into());

        let pool = match algorithm {
            LbAlgorithm::RoundRobin => {
                let mut lb = LoadBalancer::<Weighted<RoundRobin>>::from_backends(Backends::new(discovery));
                configure_health_check(&mut lb, hc, &host_for_hc);
                lb.update()
                    .await
                    .map_err(|e| NylonError::ConfigError(format!("{service_name}: backend discovery failed: {e}")))?;
                UpstreamPool::RoundRobin(Arc::new(lb))
            }
            LbAlgorithm::Weighted => {
                let mut lb = LoadBalancer::<Weighted<fnv::FnvHasher>>::from_backends(Backends::new(discovery));
                configure_health_check(&mut lb, hc, &host_for_hc);
                lb.update()
                    .await
                    .map_err(|e| NylonError::ConfigError(format!("{service_name}: backend discovery failed: {e}")))?;
                UpstreamPool::Weighted(Arc::new(lb))
            }
            LbAlgorithm::Consistent => {
                let mut lb = LoadBalancer::<KetamaHashing>::from_backends(Backends::new(discovery));
                configure_health_check(&mut lb, hc, &host_for_hc);
                lb.update()
                    .await
                    .map_err(|e| NylonError::ConfigError(format!("{service_name}: backend discovery failed: {e}")))?;
                UpstreamPool::Consistent(Arc::new(lb))
            }
            LbAlgorithm::Random => {
                let mut lb = LoadBalancer::<Weighted<Random>>::from_backends(Backends::new(discovery));
                configure_health_check(&mut lb, hc, &host_for_hc);
                lb.update()
                    .await
                    .map_err(|e| NylonError::ConfigError(format!("{service_name}: backend discovery failed: {e}")))?;
                UpstreamPool::Random(Arc::new(lb))
            }
        };
        Ok(pool)
    }

    /// `key` is the consistent-hash key for `Consistent`/`Weighted`
    /// algorithms and ignored by `RoundRobin`/`Random`.
    pub fn select(&self, key: &[u8]) -> Option<Backend> {
        match self {
            UpstreamPool::RoundRobin(lb) => lb.select(key, 256),
            UpstreamPool::Weighted(lb) => lb.select(key, 256),
            UpstreamPool::Consistent(lb) => lb.select(key, 256),
            UpstreamPool::Random(lb) => lb.select(key, 256),
        }
    }

    pub async fn run_health_check(&self) {
        match self {
            UpstreamPool::RoundRobin(lb) => lb.backends().run_health_check(true).await,
            UpstreamPool::Weighted(lb) => lb.backends().run_health_check(true).await,
            UpstreamPool::Consistent(lb) => lb.backends().run_health_check(true).await,
            UpstreamPool::Random(lb) => lb.backends().run_health_check(true).await,
        }
    }

    pub fn backend_count(&self) -> usize {
        match self {
            UpstreamPool::RoundRobin(lb) => lb.backends().get_backend().len(),
            UpstreamPool::Weighted(lb) => lb.backends().get_backend().len(),
            UpstreamPool::Consistent(lb) => lb.backends().get_backend().len(),
            UpstreamPool::Random(lb) => lb.backends().get_backend().len(),
        }
    }
}

fn configure_health_check<S: BackendSelection>(lb: &mut LoadBalancer<S>, hc: &HealthCheckConfig, host: &str)
where
    S::Iter: 'static,
{
    if !hc.enabled {
        return;
    }
    let timeout = parse_duration_or(&hc.timeout, Duration::from_secs(1));
    let interval = parse_duration_or(&hc.interval, Duration::from_secs(10));

    let mut check = HttpHealthCheck::new(host, false);
    check.consecutive_success = hc.healthy_threshold as usize;
    check.consecutive_failure = hc.unhealthy_threshold as usize;
    check.peer_template.options.connection_timeout = Some(timeout);
    check.peer_template.options.read_timeout = Some(timeout);
    if let Ok(mut req) = RequestHeader::build("GET", hc.path.as_bytes(), None) {
        let _ = req.append_header("Host", host);
        check.req = req;
    }
    // A response in [200,400) counts as success; anything else (or a
    // connection failure pingora already treats as a failure upstream of
    // this) does not.
    check.validator = Some(Box::new(|header: &ResponseHeader| {
        let status = header.status.as_u16();
        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(pingora_core::Error::explain(
                pingora_core::ErrorType::InternalError,
                format!("health check returned status {status}"),
            ))
        }
    }));
    lb.set_health_check(Box::new(check));
    lb.parallel_health_check = true;
    lb.health_check_frequency = Some(interval);
}

fn parse_duration_or(raw: &str, default: Duration) -> Duration {
    nylon_core::upstream::parse_duration_suffixed(raw).unwrap_or(default)
}
