// src/metrics/endpoint.rs
use super::MetricsRegistry;
use crate::proxy::BackendPool;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

/// Serves the registry at one path; everything else is a 404.
#[derive(Clone)]
pub struct MetricsHandler {
    registry: Arc<MetricsRegistry>,
    pool: Arc<BackendPool>,
    path: Arc<str>,
}

impl MetricsHandler {
    pub fn new(registry: Arc<MetricsRegistry>, pool: Arc<BackendPool>, path: &str) -> Self {
        Self {
            registry,
            pool,
            path: Arc::from(path),
        }
    }

    fn respond(&self, req: &Request<Body>) -> Response<Body> {
        if req.uri().path() != &*self.path {
            let mut resp = Response::new(Body::from("Not Found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            return resp;
        }

        self.registry.collector().refresh_from_pool(&self.pool);

        let mut resp = Response::new(Body::from(self.registry.gather()));
        resp.headers_mut().insert(
            CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        resp
    }
}

impl Service<Request<Body>> for MetricsHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        futures::future::ready(Ok(self.respond(&req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::LeastConnectionsBalancer;
    use crate::proxy::Backend;

    fn handler() -> MetricsHandler {
        let pool = BackendPool::new(Arc::new(LeastConnectionsBalancer::new()), 1);
        pool.add_server(Backend::new("http://127.0.0.1:5000").unwrap())
            .unwrap();
        MetricsHandler::new(
            Arc::new(MetricsRegistry::new().unwrap()),
            Arc::new(pool),
            "/metrics",
        )
    }

    #[tokio::test]
    async fn serves_exposition_at_path() {
        let mut handler = handler();
        let resp = handler
            .call(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain; version=0.0.4");
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("lb_backends_total 1"));
        assert!(text.contains("lb_backends_alive 1"));
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let mut handler = handler();
        let resp = handler
            .call(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
