pub mod access_log;
pub mod logging;
pub mod metrics;
pub mod prometheus_exporter;
pub mod server;

pub use metrics::MetricsCollector;
