use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide Prometheus registry. One instance lives for the life of the
/// server; every proxy/plugin/LB/health/websocket call site holds an `Arc`
/// to it and records through the typed fields directly.
pub struct MetricsCollector {
    registry: Registry,

    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    pub plugin_dispatch_duration: HistogramVec,
    pub plugin_dispatch_errors_total: IntCounterVec,

    pub lb_selections_total: IntCounterVec,

    pub health_check_transitions_total: IntCounterVec,

    pub ws_connections: IntGauge,
    pub ws_rooms: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("nylon_http_requests_total", "Total HTTP requests").namespace("nylon"),
            &["route", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("nylon_http_request_duration_seconds", "Request latency")
                .namespace("nylon")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["route", "status"],
        )?;

        let plugin_dispatch_duration = HistogramVec::new(
            HistogramOpts::new("nylon_plugin_dispatch_seconds", "Plugin dispatch time")
                .namespace("nylon")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["plugin", "phase"],
        )?;
        let plugin_dispatch_errors_total = IntCounterVec::new(
            Opts::new("nylon_plugin_dispatch_errors_total", "Plugin dispatch failures").namespace("nylon"),
            &["plugin", "phase"],
        )?;

        let lb_selections_total = IntCounterVec::new(
            Opts::new("nylon_lb_selections_total", "Upstream selections by endpoint").namespace("nylon"),
            &["service", "endpoint"],
        )?;

        let health_check_transitions_total = IntCounterVec::new(
            Opts::new("nylon_health_check_transitions_total", "Healthy/unhealthy transitions").namespace("nylon"),
            &["service", "endpoint", "state"],
        )?;

        let ws_connections = IntGauge::new("nylon_ws_connections", "Active websocket connections")?;
        let ws_rooms = IntGauge::new("nylon_ws_rooms", "Active websocket rooms")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(plugin_dispatch_duration.clone()))?;
        registry.register(Box::new(plugin_dispatch_errors_total.clone()))?;
        registry.register(Box::new(lb_selections_total.clone()))?;
        registry.register(Box::new(health_check_transitions_total.clone()))?;
        registry.register(Box::new(ws_connections.clone()))?;
        registry.register(Box::new(ws_rooms.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            plugin_dispatch_duration,
            plugin_dispatch_errors_total,
            lb_selections_total,
            health_check_transitions_total,
            ws_connections,
            ws_rooms,
        })
    }

    pub fn record_request(&self, route: &str, status: u16, duration_secs: f64) {
        let status = status.to_string();
        self.http_requests_total.with_label_values(&[route, &status]).inc();
        self.http_request_duration.with_label_values(&[route, &status]).observe(duration_secs);
    }

    pub fn record_plugin_dispatch(&self, plugin: &str, phase: &str, duration_secs: f64, failed: bool) {
        self.plugin_dispatch_duration.with_label_values(&[plugin, phase]).observe(duration_secs);
        if failed {
            self.plugin_dispatch_errors_total.with_label_values(&[plugin, phase]).inc();
        }
    }

    pub fn record_lb_selection(&self, service: &str, endpoint: &str) {
        self.lb_selections_total.with_label_values(&[service, endpoint]).inc();
    }

    pub fn record_health_transition(&self, service: &str, endpoint: &str, healthy: bool) {
        let state = if healthy { "healthy" } else { "unhealthy" };
        self.health_check_transitions_total.with_label_values(&[service, endpoint, state]).inc();
    }

    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("metric descriptors are well-formed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let m = MetricsCollector::new().unwrap();
        m.record_request("/users", 200, 0.012);
        let text = m.gather_text();
        assert!(text.contains("nylon_http_requests_total"));
        assert!(text.contains("nylon_http_request_duration_seconds"));
    }

    #[test]
    fn record_plugin_dispatch_only_counts_errors_on_failure() {
        let m = MetricsCollector::new().unwrap();
        m.record_plugin_dispatch("auth", "request_filter", 0.001, false);
        m.record_plugin_dispatch("auth", "request_filter", 0.002, true);
        assert_eq!(
            m.plugin_dispatch_errors_total.with_label_values(&["auth", "request_filter"]).get(),
            1
        );
    }

    #[test]
    fn record_health_transition_labels_by_state() {
        let m = MetricsCollector::new().unwrap();
        m.record_health_transition("backend", "10.0.0.1:8080", false);
        assert_eq!(
            m.health_check_transitions_total
                .with_label_values(&["backend", "10.0.0.1:8080", "unhealthy"])
                .get(),
            1
        );
    }
}
