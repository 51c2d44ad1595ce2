// src/proxy/backend.rs
use super::identity::{parse_backend_url, IdentityError};
use super::proxy::ProxyError;
use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::http::uri::Scheme;
use hyper::{Body, Client, Request, Response, Uri};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub type HttpClient = Client<HttpConnector, Body>;

/// One proxied server.
///
/// Liveness and the in-flight counter are independent: toggling `alive`
/// never contends with the per-request increment/decrement path.
#[derive(Debug)]
pub struct Backend {
    id: String,
    url: Uri,
    alive: AtomicBool,
    active_connections: AtomicUsize,
    client: HttpClient,
}

impl Backend {
    /// Build a backend from a raw URL with its own HTTP client.
    pub fn new(raw_url: &str) -> Result<Self, IdentityError> {
        Self::with_client(raw_url, Client::new())
    }

    /// Build a backend that forwards through a shared client (and its
    /// connection pool). Only `http` backends can be reached.
    pub fn with_client(raw_url: &str, client: HttpClient) -> Result<Self, IdentityError> {
        let url = parse_backend_url(raw_url)?;
        if url.scheme() != Some(&Scheme::HTTP) {
            return Err(IdentityError::MalformedUrl {
                url: raw_url.to_string(),
                reason: format!("unsupported scheme {:?}, expected http", url.scheme_str().unwrap_or("")),
            });
        }

        Ok(Self {
            id: String::new(),
            url,
            alive: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            client,
        })
    }

    /// Empty until the pool registers the backend.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count one in-flight forward until the returned guard is dropped.
    pub fn connection_guard(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Forward `req` to this backend and return its response.
    ///
    /// Transport failures come back as a 502 response, never as an error.
    /// The in-flight counter stays raised until the response body has been
    /// fully streamed (or dropped).
    pub async fn serve(self: &Arc<Self>, mut req: Request<Body>) -> Response<Body> {
        let guard = self.connection_guard();

        if let Err(err) = self.rewrite_target(&mut req) {
            tracing::warn!(backend_id = %self.id, %err, "failed to rewrite request target");
            return ProxyError::BackendError(err.to_string()).into();
        }

        match self.client.request(req).await {
            Ok(resp) => {
                let (mut parts, body) = resp.into_parts();
                strip_hop_by_hop(&mut parts.headers);

                let body = Body::wrap_stream(body.map(move |chunk| {
                    let _held = &guard;
                    chunk
                }));
                Response::from_parts(parts, body)
            }
            Err(err) => {
                tracing::warn!(backend_id = %self.id, url = %self.url, %err, "forward failed");
                ProxyError::BackendError(err.to_string()).into()
            }
        }
    }

    /// Point `req` at this backend: scheme, authority, base path and Host.
    fn rewrite_target(&self, req: &mut Request<Body>) -> Result<(), hyper::http::Error> {
        let path = join_path(self.url.path(), req.uri().path());
        let path_and_query = match (self.url.query(), req.uri().query()) {
            (Some(base), Some(extra)) => format!("{}?{}&{}", path, base, extra),
            (Some(q), None) | (None, Some(q)) => format!("{}?{}", path, q),
            (None, None) => path,
        };

        let mut builder = Uri::builder().path_and_query(path_and_query);
        if let Some(scheme) = self.url.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.url.authority() {
            builder = builder.authority(authority.clone());
            req.headers_mut()
                .insert(HOST, HeaderValue::from_str(authority.as_str())?);
        }

        *req.uri_mut() = builder.build()?;
        strip_hop_by_hop(req.headers_mut());
        Ok(())
    }
}

/// RAII handle on one unit of `active_connections`.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
