// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Demo backends always listen on loopback, whatever `api_host` is, so the
/// URLs the pool registers point at the sockets that were actually bound.
pub const DEMO_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    #[default]
    LeastConnections,
    RoundRobin,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no backends configured: set `backends` or a non-zero `num_of_servers`")]
    NoBackends,

    #[error("demo ports {start}..{start}+{count} exceed 65535")]
    PortRangeOverflow { start: u16, count: usize },

    #[error("metrics port {0} collides with the load balancer port")]
    PortCollision(u16),

    #[error("metrics path {0:?} must start with '/'")]
    InvalidMetricsPath(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_host: String,
    pub load_balancer_port: u16,
    pub starting_port: u16,
    pub num_of_servers: usize,
    /// Explicit backend URLs. Empty means the demo servers.
    pub backends: Vec<String>,
    pub spawn_demo_backends: bool,
    pub algorithm: LoadBalancerAlgorithm,
    pub shutdown_timeout_secs: u64,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            load_balancer_port: 8080,
            starting_port: 8000,
            num_of_servers: 5,
            backends: Vec::new(),
            spawn_demo_backends: true,
            algorithm: LoadBalancerAlgorithm::default(),
            shutdown_timeout_secs: 10,
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() && self.num_of_servers == 0 {
            return Err(ConfigError::NoBackends);
        }

        if usize::from(self.starting_port) + self.num_of_servers > usize::from(u16::MAX) + 1 {
            return Err(ConfigError::PortRangeOverflow {
                start: self.starting_port,
                count: self.num_of_servers,
            });
        }

        if self.metrics.enabled {
            if self.metrics.port == self.load_balancer_port {
                return Err(ConfigError::PortCollision(self.metrics.port));
            }
            if !self.metrics.path.starts_with('/') {
                return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
            }
        }

        Ok(())
    }

    /// Backend URLs to register: the explicit list, or one per demo server.
    pub fn backend_urls(&self) -> Vec<String> {
        if !self.backends.is_empty() {
            return self.backends.clone();
        }

        (0..self.num_of_servers)
            .map(|i| format!("http://{}:{}", DEMO_HOST, usize::from(self.starting_port) + i))
            .collect()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}
