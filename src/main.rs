// src/main.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use lc_balancer::{
    config::{self, Config},
    demo,
    load_balancer::create_load_balancer,
    metrics::{MetricsHandler, MetricsRegistry},
    proxy::{Backend, BackendPool, HttpClient, Proxy},
    server::{resolve_addr, RequestHandler, ServerBuilder, ServerHandle},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lc_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            config::load_config(&path).await?
        }
        None => Config::default(),
    };
    config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config.validate()?;

    // Demo backends first so the pool has somewhere to send traffic.
    let demo_servers = if config.spawn_demo_backends && config.backends.is_empty() {
        demo::spawn_hello_servers(
            config::DEMO_HOST,
            config.starting_port,
            config.num_of_servers,
        )
        .await?
    } else {
        Vec::new()
    };

    let pool = Arc::new(build_pool(&config)?);
    info!(
        backends = pool.len(),
        algorithm = pool.balancer_name(),
        "Backend pool ready"
    );

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    let metrics_server = if config.metrics.enabled {
        let addr = resolve_addr(&config.api_host, config.metrics.port).await?;
        let handle = ServerBuilder::new(addr)
            .with_handler(MetricsHandler::new(
                metrics_registry.clone(),
                pool.clone(),
                &config.metrics.path,
            ))
            .spawn()
            .await?;
        info!(
            "Metrics server listening on http://{}{}",
            handle.local_addr(),
            config.metrics.path
        );
        Some(handle)
    } else {
        None
    };

    // Start main server
    let proxy = Arc::new(Proxy::new(pool, metrics));
    let addr = resolve_addr(&config.api_host, config.load_balancer_port).await?;
    let balancer = ServerBuilder::new(addr)
        .with_handler(RequestHandler::new(proxy))
        .spawn()
        .await?;
    info!("Load balancer listening at {}", balancer.local_addr());

    shutdown_signal().await;

    let grace = config.shutdown_timeout();
    let mut servers: Vec<(&str, ServerHandle)> = vec![("load balancer", balancer)];
    servers.extend(metrics_server.map(|h| ("metrics", h)));
    servers.extend(demo_servers.into_iter().map(|h| ("demo backend", h)));

    for (name, handle) in servers {
        let addr = handle.local_addr();
        if let Err(err) = handle.shutdown(grace).await {
            error!(%addr, %err, "error shutting down {}", name);
        }
    }

    info!("Servers shut down gracefully.");
    Ok(())
}

/// Register every configured backend. Any failure aborts startup.
fn build_pool(config: &Config) -> Result<BackendPool> {
    let urls = config.backend_urls();
    let pool = BackendPool::new(create_load_balancer(config.algorithm), urls.len());
    let client = HttpClient::new();

    for url in urls {
        let backend = Backend::with_client(&url, client.clone())
            .with_context(|| format!("error creating backend for {}", url))?;
        pool.add_server(backend)
            .with_context(|| format!("error registering backend {}", url))?;
    }

    if pool.is_empty() {
        warn!("Backend pool is empty, every request will be rejected");
    }
    Ok(pool)
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(%err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
