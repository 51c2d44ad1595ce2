// src/demo/hello.rs
use crate::server::{bind_tcp, ServerBuilder, ServerHandle};
use anyhow::{Context, Result};
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use tower::Service;

#[derive(Debug, Clone)]
pub struct HelloHandler {
    greeting: String,
}

impl HelloHandler {
    pub fn new(port: u16) -> Self {
        Self {
            greeting: format!("Hello World from server on port {}!", port),
        }
    }
}

impl Service<Request<Body>> for HelloHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<Body>) -> Self::Future {
        futures::future::ready(Ok(Response::new(Body::from(self.greeting.clone()))))
    }
}

/// Start one hello server. With port 0 the greeting names the bound port.
pub async fn spawn_hello_server(host: IpAddr, port: u16) -> Result<ServerHandle> {
    let addr = SocketAddr::new(host, port);
    let listener = bind_tcp(addr).await?;
    let port = listener.local_addr()?.port();

    ServerBuilder::new(addr)
        .with_handler(HelloHandler::new(port))
        .spawn_on(listener)
        .await
}

/// Start `count` hello servers on consecutive ports from `starting_port`.
pub async fn spawn_hello_servers(
    host: IpAddr,
    starting_port: u16,
    count: usize,
) -> Result<Vec<ServerHandle>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let port = u16::try_from(usize::from(starting_port) + i)
            .with_context(|| format!("demo port {} + {} out of range", starting_port, i))?;
        let handle = spawn_hello_server(host, port).await?;
        tracing::info!(addr = %handle.local_addr(), "Server-{} listening", i + 1);
        handles.push(handle);
    }
    Ok(handles)
}
