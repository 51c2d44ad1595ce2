// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind/accept so we can swap TLS later.
// ────────────────────────────────
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Facts about the accepted connection, attached to every request on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    pub tls: bool,
}

pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    Ok(listener)
}

/// Resolve a configured host (IP literal or name) to the first socket
/// address it maps to.
pub async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {}", host))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no addresses", host))
}
