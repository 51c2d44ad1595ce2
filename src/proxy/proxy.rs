// ────────────────────────────────
// src/proxy/proxy.rs
// Request boundary: pick a backend, stamp forwarding headers, hand off.
// ────────────────────────────────

use super::pool::{BackendPool, PoolError};
use crate::metrics::MetricsCollector;
use crate::server::ConnectionInfo;
use hyper::header::{HeaderValue, HOST};
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;

pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

pub struct Proxy {
    pool: Arc<BackendPool>,
    metrics: Arc<MetricsCollector>,
}

impl Proxy {
    pub fn new(pool: Arc<BackendPool>, metrics: Arc<MetricsCollector>) -> Self {
        Self { pool, metrics }
    }

    /// Route one request. Always produces a response; a missing backend is
    /// a 503 and is not retried.
    pub async fn handle(&self, mut req: Request<Body>) -> Response<Body> {
        let start = Instant::now();

        let backend = match self.pool.select_server() {
            Ok(backend) => backend,
            Err(err) => {
                tracing::error!(
                    %err,
                    method = %req.method(),
                    path = %req.uri().path(),
                    backends = self.pool.len(),
                    "no backend available"
                );
                self.metrics.record_unavailable();
                return ProxyError::from(err).into();
            }
        };

        set_forwarding_headers(&mut req);
        tracing::debug!(backend_id = %backend.id(), path = %req.uri().path(), "forwarding request");

        let resp = backend.serve(req).await;
        self.metrics
            .record_request(backend.id(), resp.status(), start.elapsed());
        resp
    }
}

/// Record the caller's view of the request for the backend.
fn set_forwarding_headers(req: &mut Request<Body>) {
    let info = req.extensions().get::<ConnectionInfo>().copied();

    let original_host = req
        .headers()
        .get(HOST)
        .cloned()
        .or_else(|| {
            req.uri()
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

    let headers = req.headers_mut();
    match original_host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }

    if let Some(info) = info {
        let client_ip = info.remote_addr.ip().to_string();
        let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.is_empty() => format!("{}, {}", prior, client_ip),
            _ => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    let proto = if info.map_or(false, |i| i.tls) { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Backend error: {0}")]
    BackendError(String),
}

impl From<PoolError> for ProxyError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Unavailable => ProxyError::NoHealthyBackends,
            other => ProxyError::BackendError(other.to_string()),
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoHealthyBackends => (StatusCode::SERVICE_UNAVAILABLE, "service unavailable"),
            ProxyError::BackendError(_) => (StatusCode::BAD_GATEWAY, "bad gateway"),
        };

        let mut resp = Response::new(Body::from(message));
        *resp.status_mut() = status;
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::LeastConnectionsBalancer;
    use crate::metrics::MetricsRegistry;
    use crate::proxy::Backend;
    use std::net::SocketAddr;

    fn proxy_with(pool: BackendPool) -> (Proxy, MetricsRegistry) {
        let registry = MetricsRegistry::new().unwrap();
        (Proxy::new(Arc::new(pool), registry.collector()), registry)
    }

    fn empty_pool() -> BackendPool {
        BackendPool::new(Arc::new(LeastConnectionsBalancer::new()), 0)
    }

    fn info(addr: &str, tls: bool) -> ConnectionInfo {
        ConnectionInfo {
            remote_addr: addr.parse::<SocketAddr>().unwrap(),
            tls,
        }
    }

    #[test]
    fn forwarding_headers_for_plain_connection() {
        let mut req = Request::builder()
            .uri("/x")
            .header(HOST, "lb.example.com:8080")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(info("192.0.2.7:51000", false));

        set_forwarding_headers(&mut req);

        let h = req.headers();
        assert_eq!(h[X_FORWARDED_HOST], "lb.example.com:8080");
        assert_eq!(h[X_FORWARDED_FOR], "192.0.2.7");
        assert_eq!(h[X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn forwarded_for_appends_and_tls_sets_https() {
        let mut req = Request::builder()
            .uri("/x")
            .header(X_FORWARDED_FOR, "203.0.113.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(info("[2001:db8::1]:443", true));

        set_forwarding_headers(&mut req);

        let h = req.headers();
        assert_eq!(h[X_FORWARDED_FOR], "203.0.113.1, 2001:db8::1");
        assert_eq!(h[X_FORWARDED_PROTO], "https");
        assert!(h.get(X_FORWARDED_HOST).is_none());
    }

    #[test]
    fn pool_errors_map_to_statuses() {
        let unavailable: Response<Body> = ProxyError::from(PoolError::Unavailable).into();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let other: Response<Body> = ProxyError::from(PoolError::NotFound("x".into())).into();
        assert_eq!(other.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn no_alive_backend_is_service_unavailable() {
        let pool = empty_pool();
        let backend = pool
            .add_server(Backend::new("http://127.0.0.1:5000").unwrap())
            .unwrap();
        pool.update_server_status(backend.id(), false).unwrap();
        let (proxy, registry) = proxy_with(pool);

        let resp = proxy
            .handle(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("lb_unavailable_total 1"));
    }

    #[tokio::test]
    async fn forwards_to_selected_backend_with_trace_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/greet")
            .match_header(X_FORWARDED_HOST, "lb.local")
            .match_header(X_FORWARDED_FOR, "198.51.100.4")
            .match_header(X_FORWARDED_PROTO, "http")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let pool = empty_pool();
        pool.add_server(Backend::new(&server.url()).unwrap()).unwrap();
        let (proxy, _registry) = proxy_with(pool);

        let mut req = Request::builder()
            .uri("/greet")
            .header(HOST, "lb.local")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(info("198.51.100.4:40000", false));

        let resp = proxy.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"hello");
        mock.assert_async().await;
    }
}
