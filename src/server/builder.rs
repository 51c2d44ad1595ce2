// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::server::listener::{bind_tcp, ConnectionInfo};
use anyhow::{Context, Result};
use hyper::{server::conn::Http, service::service_fn, Body, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tower::Service;

/// Builder pattern so `main.rs` can inject its Proxy (or any handler).
pub struct ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    addr: SocketAddr,
    handler: Option<H>,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, handler: None }
    }

    /// Inject your request handler (usually wraps `proxy::Proxy`).
    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind the listener and run the accept loop on its own task.
    ///
    /// The returned handle owns the server: dropping it without calling
    /// [`ServerHandle::shutdown`] also stops accepting.
    pub async fn spawn(self) -> Result<ServerHandle> {
        let listener = bind_tcp(self.addr).await?;
        self.spawn_on(listener).await
    }

    /// Run the accept loop on a listener the caller already bound. The
    /// builder's own address is ignored.
    pub async fn spawn_on(self, listener: TcpListener) -> Result<ServerHandle> {
        let handler = self
            .handler
            .context("handler must be set via with_handler()")?;

        let local_addr = listener.local_addr()?;
        tracing::info!("HTTP server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, let open connections finish their current exchange,
    /// and wait up to `grace` for them. Connections still open after that
    /// are aborted.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => joined.context("server task failed")?,
            Err(_) => {
                tracing::warn!(addr = %self.local_addr, ?grace, "connections still open after grace period");
                task.abort();
                Ok(())
            }
        }
    }
}

async fn accept_loop<H>(
    listener: TcpListener,
    handler: H,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    // Dropping the set (when this task is aborted) aborts every connection.
    let mut conns = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                }
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => continue,
            _ = shutdown_rx.changed() => break,
        };

        let info = ConnectionInfo {
            remote_addr: peer,
            tls: false,
        };
        let handler = handler.clone();
        let svc = service_fn(move |mut req: Request<Body>| {
            req.extensions_mut().insert(info);
            let mut handler = handler.clone();
            handler.call(req)
        });

        let mut conn_shutdown = shutdown_rx.clone();

        // One Tokio task per connection.
        conns.spawn(async move {
            let conn = Http::new().serve_connection(stream, svc);
            tokio::pin!(conn);

            let result = tokio::select! {
                res = conn.as_mut() => res,
                _ = conn_shutdown.changed() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(err) = result {
                tracing::warn!(%peer, %err, "connection error");
            }
        });
    }

    tracing::info!("HTTP server on {} stopped accepting", listener.local_addr()?);
    drop(listener);
    while conns.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Signals once a request arrives, then never answers.
    #[derive(Clone)]
    struct Stalled(Arc<Notify>);

    impl Service<Request<Body>> for Stalled {
        type Response = Response<Body>;
        type Error = Infallible;
        type Future = futures::future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Body>) -> Self::Future {
            let arrived = self.0.clone();
            Box::pin(async move {
                arrived.notify_one();
                futures::future::pending::<Result<Response<Body>, Infallible>>().await
            })
        }
    }

    #[tokio::test]
    async fn spawn_on_serves_a_prebound_listener() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let bound = listener.local_addr().unwrap();

        let handle = ServerBuilder::new("0.0.0.0:1".parse().unwrap())
            .with_handler(Stalled(Arc::new(Notify::new())))
            .spawn_on(listener)
            .await
            .unwrap();

        assert_eq!(handle.local_addr(), bound);
        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_aborts_connections_past_the_grace_period() {
        let arrived = Arc::new(Notify::new());
        let handle = ServerBuilder::new("127.0.0.1:0".parse().unwrap())
            .with_handler(Stalled(arrived.clone()))
            .spawn()
            .await
            .unwrap();

        let uri: hyper::Uri = format!("http://{}/", handle.local_addr()).parse().unwrap();
        let client = tokio::spawn(async move { hyper::Client::new().get(uri).await });
        arrived.notified().await;

        handle.shutdown(Duration::from_millis(100)).await.unwrap();

        // The stalled connection is torn down, so the client sees an error
        // instead of hanging.
        let outcome = tokio::time::timeout(Duration::from_secs(2), client)
            .await
            .expect("client still waiting after shutdown")
            .unwrap();
        assert!(outcome.is_err());
    }
}
