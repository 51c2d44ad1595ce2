// src/metrics/collector.rs
use crate::proxy::BackendPool;
use anyhow::Result;
use hyper::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
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

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(%err, "failed to encode metrics");
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub unavailable_total: IntCounter,

    // Pool metrics, sampled at scrape time
    pub backend_connections_active: IntGaugeVec,
    pub backends_total: IntGauge,
    pub backends_alive: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of forwarded requests"),
            &["status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time until the backend answered, in seconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let unavailable_total = IntCounter::new(
            "lb_unavailable_total",
            "Requests rejected because no backend was alive",
        )?;
        registry.register(Box::new(unavailable_total.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "In-flight forwards per backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backends_total = IntGauge::new("lb_backends_total", "Registered backends")?;
        registry.register(Box::new(backends_total.clone()))?;

        let backends_alive = IntGauge::new("lb_backends_alive", "Backends marked alive")?;
        registry.register(Box::new(backends_alive.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            unavailable_total,
            backend_connections_active,
            backends_total,
            backends_alive,
        })
    }

    pub fn record_request(&self, backend: &str, status: StatusCode, duration: Duration) {
        self.requests_total
            .with_label_values(&[status.as_str(), backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_unavailable(&self) {
        self.unavailable_total.inc();
    }

    pub fn update_backend_counts(&self, alive: usize, total: usize) {
        self.backends_alive.set(alive as i64);
        self.backends_total.set(total as i64);
    }

    /// Copy the pool's current membership and load into the gauges.
    pub fn refresh_from_pool(&self, pool: &BackendPool) {
        let backends = pool.list_servers();

        // Drop label sets of removed backends.
        self.backend_connections_active.reset();
        for backend in &backends {
            self.backend_connections_active
                .with_label_values(&[backend.id()])
                .set(backend.active_connections() as i64);
        }

        let alive = backends.iter().filter(|b| b.is_alive()).count();
        self.update_backend_counts(alive, backends.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::LeastConnectionsBalancer;
    use crate::proxy::Backend;

    #[test]
    fn refresh_reflects_pool_state() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        let pool = BackendPool::new(Arc::new(LeastConnectionsBalancer::new()), 2);
        let a = pool.add_server(Backend::new("http://127.0.0.1:5000").unwrap()).unwrap();
        let b = pool.add_server(Backend::new("http://127.0.0.1:5001").unwrap()).unwrap();
        pool.update_server_status(b.id(), false).unwrap();
        let _guard = a.connection_guard();

        metrics.refresh_from_pool(&pool);

        assert_eq!(metrics.backends_total.get(), 2);
        assert_eq!(metrics.backends_alive.get(), 1);
        assert_eq!(
            metrics.backend_connections_active.with_label_values(&[a.id()]).get(),
            1
        );

        pool.remove_server(a.id()).unwrap();
        metrics.refresh_from_pool(&pool);
        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(!text.contains(a.id()));
        assert!(text.contains("lb_backends_total 1"));
    }

    #[test]
    fn records_requests_by_status_and_backend() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request("abc", StatusCode::OK, Duration::from_millis(5));
        metrics.record_request("abc", StatusCode::OK, Duration::from_millis(7));
        metrics.record_request("abc", StatusCode::BAD_GATEWAY, Duration::from_millis(1));

        assert_eq!(metrics.requests_total.with_label_values(&["200", "abc"]).get(), 2);
        assert_eq!(metrics.requests_total.with_label_values(&["502", "abc"]).get(), 1);
    }
}
