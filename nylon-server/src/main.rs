//! Nylon CLI: `nylon run -c <config.yaml>` starts the proxy; `nylon check -c
//! <config.yaml>` validates a config without binding anything.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::{Parser, Subcommand};
use nylon_core::error::NylonError;
use nylon_core::router::Router;
use nylon_core::service::Service;
use nylon_core::upstream::{Endpoint, HealthCheckConfig};
use nylon_observability::metrics::MetricsCollector;
use nylon_plugin::PluginRegistry;
use nylon_proxy::health_checker::HealthRegistry;
use nylon_proxy::load_balancer::UpstreamPool;
use nylon_proxy::service::{AppState, NylonProxy};
use pingora_core::server::configuration::{Opt, ServerConf};
use pingora_core::server::Server;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "nylon", version, about = "HTTP/HTTPS reverse proxy with a pluggable request pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy.
    Run {
        #[arg(short, long, env = "NYLON_CONFIG")]
        config: PathBuf,
    },
    /// Validate a config without starting anything.
    Check {
        #[arg(short, long, env = "NYLON_CONFIG")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let code = match cli.command {
        Command::Check { config } => run_check(&config),
        Command::Run { config } => run_server(&config),
    };
    std::process::exit(code);
}

fn init_tracing() {
    nylon_observability::logging::init(std::env::var("NYLON_LOG_LEVEL").ok().as_deref());
}

fn run_check(config_path: &Path) -> i32 {
    match nylon_store::ConfigStore::check(config_path) {
        Ok(()) => {
            info!(path = %config_path.display(), "config OK");
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "config check failed");
            2
        }
    }
}

/// Everything built from config before the pingora server takes over the
/// process: the proxy's `AppState`, the health registry it feeds metrics
/// from, and the websocket hub.
struct Built {
    app_state: AppState,
    health_registry: HealthRegistry,
    health_sources: HashMap<String, (Vec<Endpoint>, HealthCheckConfig)>,
    ws_hub: Arc<nylon_ws::Hub>,
    metrics: Arc<MetricsCollector>,
}

async fn build(store: &nylon_store::ConfigStore) -> Result<Built, NylonError> {
    let runtime = store.runtime();
    let proxy = store.proxy();

    let router = Arc::new(Router::new());
    router.replace_all(proxy.routes.clone());

    let mut services = HashMap::new();
    let mut pools = HashMap::new();
    let mut health_sources = HashMap::new();
    for service in &proxy.services {
        services.insert(service.name().to_string(), service.clone());
        if let Service::Http { name, endpoints, algorithm, hc, .. } = service {
            let pool = UpstreamPool::build(name, endpoints, *algorithm, hc).await?;
            pools.insert(name.clone(), pool);
            health_sources.insert(name.clone(), (endpoints.clone(), hc.clone()));
        }
    }

    let plugin_defs: HashMap<String, _> =
        proxy.plugins.iter().map(|p| (p.name.clone(), p.clone())).collect();
    let registry = PluginRegistry::build(&proxy.plugins, &runtime.messaging)
        .await?
        .merge_handles(nylon_plugins::builtins());

    let health_registry = HealthRegistry::build(&health_sources);
    let metrics = Arc::new(MetricsCollector::new().map_err(|e| NylonError::Internal(e.to_string()))?);

    let ws_hub = build_ws_hub(&runtime.websocket).await?;

    Ok(Built {
        app_state: AppState {
            router,
            services,
            pools,
            plugin_defs,
            plugin_registry: Arc::new(registry),
            ws_listen: runtime.ws_listen.clone(),
            metrics: Arc::clone(&metrics),
        },
        health_registry,
        health_sources,
        ws_hub,
        metrics,
    })
}

/// Builds the hub together with its configured adapter. `Hub::new` takes the
/// adapter up front, but the Redis/Cluster adapters need the hub itself to
/// relay remote broadcasts into, so for those two the adapter is connected
/// first (usable for membership/publish immediately) and its subscriber
/// started once the hub wrapping it exists.
async fn build_ws_hub(cfg: &nylon_core::config::WebSocketConfig) -> Result<Arc<nylon_ws::Hub>, NylonError> {
    use nylon_core::config::WebSocketConfig;
    match cfg {
        WebSocketConfig::Memory => Ok(Arc::new(nylon_ws::Hub::new(Arc::new(nylon_ws::MemoryAdapter)))),
        WebSocketConfig::Redis { host, port, password, db, key_prefix } => {
            let adapter =
                nylon_ws::redis_adapter::RedisAdapter::connect(host, *port, password.as_deref(), *db, key_prefix, node_id())
                    .await?;
            let hub = Arc::new(nylon_ws::Hub::new(adapter.clone()));
            adapter.start(Arc::clone(&hub));
            Ok(hub)
        }
        WebSocketConfig::Cluster { nodes, key_prefix } => {
            let adapter = nylon_ws::cluster_adapter::ClusterAdapter::connect(nodes, key_prefix, node_id()).await?;
            let hub = Arc::new(nylon_ws::Hub::new(adapter.clone()));
            adapter.start(Arc::clone(&hub));
            Ok(hub)
        }
    }
}

/// Process-unique identifier used to tag this node's websocket broadcasts so
/// the Redis/Cluster adapters' own subscribers can skip what they already
/// delivered locally.
fn node_id() -> String {
    let host = hostname().unwrap_or_else(|| "nylon".to_string());
    format!("{host}-{}", std::process::id())
}

fn hostname() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf.truncate(end);
    String::from_utf8(buf).ok()
}

fn run_server(config_path: &Path) -> i32 {
    let store = match nylon_store::ConfigStore::load(config_path) {
        Ok(s) => Arc::new(s),
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return 2;
        }
    };

    for addr in store.runtime().http.iter().chain(store.runtime().https.iter()) {
        if !addr_is_bindable(addr) {
            tracing::error!(%addr, "listener address is not bindable");
            return 3;
        }
    }

    let state_swap = Arc::new(arc_swap::ArcSwap::from_pointee(match build_blocking(&store) {
        Ok(built) => {
            spawn_background(
                Arc::clone(&store),
                built.health_registry.clone(),
                built.health_sources.clone(),
                Arc::clone(&built.metrics),
                Arc::clone(&built.ws_hub),
            );
            spawn_side_services(&store, &built);
            built.app_state
        }
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            return 2;
        }
    }));

    if let Some(config_dir) = store.runtime().config_dir.clone() {
        let store_for_watch = Arc::clone(&store);
        let swap_for_watch = Arc::clone(&state_swap);
        match nylon_store::watcher::watch(
            std::path::Path::new(&config_dir),
            Duration::from_millis(500),
            move || on_config_changed(&store_for_watch, &swap_for_watch),
        ) {
            // leaked: the watcher must outlive `run_server`, which never
            // returns while the proxy is serving traffic.
            Ok(watcher) => std::mem::forget(watcher),
            Err(err) => tracing::warn!(error = %err, "config watch not started"),
        }
    }

    let threads = store.runtime().pingora.threads;
    let work_stealing = store.runtime().pingora.work_stealing;
    let graceful_shutdown_timeout_seconds = store.runtime().pingora.graceful_shutdown_timeout_seconds;
    let grace_period_seconds = store.runtime().pingora.grace_period_seconds;
    let http_listeners = store.runtime().http.clone();
    let https_listeners = store.runtime().https.clone();

    let mut conf = ServerConf::default();
    conf.threads = threads;
    conf.work_stealing = work_stealing;
    conf.grace_period_seconds = Some(grace_period_seconds);
    conf.graceful_shutdown_timeout_seconds = Some(graceful_shutdown_timeout_seconds);

    let opt = Opt { upgrade: false, daemon: false, nocapture: false, test: false, conf: None };
    let mut server = Server::new_with_opt_and_conf(Some(opt), conf);
    server.bootstrap();

    let proxy = NylonProxy::new(state_swap);
    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
    for addr in &http_listeners {
        proxy_service.add_tcp(addr);
    }
    for addr in &https_listeners {
        if let Some(entry) = store.proxy().tls.first() {
            if let nylon_core::tls::TlsKind::Custom { cert, key, .. } = &entry.kind {
                if let Err(err) = proxy_service.add_tls(addr, cert, key) {
                    tracing::error!(%addr, error = %err, "failed to configure tls listener");
                    return 3;
                }
                continue;
            }
        }
        tracing::error!(%addr, "https listener configured with no usable tls entry");
        return 3;
    }

    server.add_service(proxy_service);

    info!(
        http = ?http_listeners,
        https = ?https_listeners,
        "nylon is ready"
    );

    server.run_forever();
}

fn build_blocking(store: &nylon_store::ConfigStore) -> Result<Built, NylonError> {
    let rt = tokio::runtime::Runtime::new().map_err(NylonError::from)?;
    rt.block_on(build(store))
}

/// Spawns the health-check probes and the websocket gauge poller on a
/// dedicated OS thread with its own tokio runtime, kept alive for the life
/// of the process by awaiting a future that never resolves.
fn spawn_background(
    store: Arc<nylon_store::ConfigStore>,
    health_registry: HealthRegistry,
    health_sources: HashMap<String, (Vec<Endpoint>, HealthCheckConfig)>,
    metrics: Arc<MetricsCollector>,
    ws_hub: Arc<nylon_ws::Hub>,
) {
    std::thread::Builder::new()
        .name("nylon-background".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("tokio runtime for background services");
            rt.block_on(async move {
                health_registry.spawn_probes(&health_sources, Arc::clone(&metrics));
                tokio::spawn(poll_ws_gauges(Arc::clone(&metrics), ws_hub));
                let _ = store;
                std::future::pending::<()>().await;
            });
        })
        .expect("failed to spawn background thread");
}

/// Refreshes the connection/room gauges every second. The hub doesn't push
/// these itself since connection churn happens far more often than anything
/// scrapes `/metrics`.
async fn poll_ws_gauges(metrics: Arc<MetricsCollector>, hub: Arc<nylon_ws::Hub>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        metrics.ws_connections.set(hub.connection_count() as i64);
        metrics.ws_rooms.set(hub.room_count() as i64);
    }
}

fn spawn_side_services(store: &Arc<nylon_store::ConfigStore>, built: &Built) {
    let metrics = Arc::clone(&built.metrics);
    for addr in store.runtime().metrics.clone() {
        let metrics = Arc::clone(&metrics);
        std::thread::Builder::new()
            .name("nylon-metrics".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Runtime::new().expect("tokio runtime for metrics");
                rt.block_on(async move {
                    if let Err(err) = nylon_observability::server::serve(&addr, metrics).await {
                        tracing::error!(%addr, error = %err, "metrics listener stopped");
                    }
                });
            })
            .expect("failed to spawn metrics thread");
    }

    let hub = Arc::clone(&built.ws_hub);
    let ws_listen = store.runtime().ws_listen.clone();
    std::thread::Builder::new()
        .name("nylon-ws".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("tokio runtime for websocket hub");
            rt.block_on(async move {
                let callbacks_factory = || -> Arc<dyn nylon_ws::WebSocketCallbacks> { Arc::new(nylon_ws::LoggingCallbacks) };
                if let Err(err) = nylon_ws::server::serve(&ws_listen, hub, callbacks_factory).await {
                    tracing::error!(error = %err, "websocket hub listener stopped");
                }
            });
        })
        .expect("failed to spawn websocket hub thread");
}

fn on_config_changed(store: &Arc<nylon_store::ConfigStore>, state_swap: &Arc<arc_swap::ArcSwap<AppState>>) {
    match store.reload() {
        Ok(()) => {
            let store = Arc::clone(store);
            let state_swap = Arc::clone(state_swap);
            std::thread::spawn(move || {
                let rt = tokio::runtime::Runtime::new().expect("tokio runtime for reload");
                match rt.block_on(build(&store)) {
                    Ok(built) => {
                        state_swap.store(Arc::new(built.app_state));
                        info!("config reload applied");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "config reload rejected while rebuilding runtime state");
                    }
                }
            });
        }
        Err(err) => {
            tracing::error!(error = %err, "config reload rejected, keeping previous snapshot");
        }
    }
}

fn addr_is_bindable(addr: &str) -> bool {
    std::net::TcpListener::bind(addr).is_ok()
}
