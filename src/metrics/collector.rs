// src/metrics/collector.rs
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Text exposition format of everything registered.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

pub struct MetricsCollector {
    // Check metrics
    pub checks_total: IntCounterVec,
    pub check_duration_seconds: HistogramVec,
    pub health_status: IntGaugeVec,

    // HTTP metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub handler_panics_total: IntCounter,

    // Server metrics
    pub active_connections: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let checks_total = IntCounterVec::new(
            Opts::new("lifeline_health_checks_total", "Total check invocations"),
            &["category", "check", "outcome"],
        )?;
        registry.register(Box::new(checks_total.clone()))?;

        let check_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lifeline_health_check_duration_seconds",
                "Check duration in seconds",
            ),
            &["category", "check"],
        )?;
        registry.register(Box::new(check_duration_seconds.clone()))?;

        let health_status = IntGaugeVec::new(
            Opts::new(
                "lifeline_health_status",
                "Last aggregate status per category (1=healthy, 0=unhealthy)",
            ),
            &["category"],
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let requests_total = IntCounterVec::new(
            Opts::new("lifeline_http_requests_total", "Total number of requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lifeline_http_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "path"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let handler_panics_total = IntCounter::new(
            "lifeline_http_handler_panics_total",
            "Request handler panics converted to 500 responses",
        )?;
        registry.register(Box::new(handler_panics_total.clone()))?;

        let active_connections =
            IntGauge::new("lifeline_active_connections", "Open client connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            checks_total,
            check_duration_seconds,
            health_status,
            requests_total,
            request_duration_seconds,
            handler_panics_total,
            active_connections,
        })
    }

    pub fn record_check(&self, category: &str, check: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.checks_total
            .with_label_values(&[category, check, outcome])
            .inc();

        self.check_duration_seconds
            .with_label_values(&[category, check])
            .observe(duration.as_secs_f64());
    }

    pub fn update_health_status(&self, category: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.health_status.with_label_values(&[category]).set(value);
    }

    pub fn record_request(&self, method: &str, path: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, path, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    pub fn record_handler_panic(&self) {
        self.handler_panics_total.inc();
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }
}
