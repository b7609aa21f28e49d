//! The `/metrics` scrape surface. Bound on every address listed in
//! `RuntimeConfig.metrics`, one `axum` listener per address. There is no
//! other HTTP surface in this crate, so the metrics route is the entire
//! router.

use crate::metrics::MetricsCollector;
use axum::{extract::State, routing::get, Router};
use std::sync::Arc;
use tracing::info;

pub async fn serve(addr: &str, metrics: Arc<MetricsCollector>) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler)).with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, app).await
}

async fn metrics_handler(State(metrics): State<Arc<MetricsCollector>>) -> String {
    metrics.gather_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_handler_returns_prometheus_text() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        metrics.record_request("/", 200, 0.01);
        let body = metrics_handler(State(metrics)).await;
        assert!(body.contains("nylon_http_requests_total"));
    }
}
