// src/load_balancer/mod.rs
mod algorithm;
mod least_conn;
mod round_robin;

pub use algorithm::LoadBalancer; // trait
pub use least_conn::LeastConnectionsBalancer;
pub use round_robin::RoundRobinBalancer;
pub use crate::config::LoadBalancerAlgorithm; // enum exposed if needed

use std::sync::Arc;

pub fn create_load_balancer(algorithm: LoadBalancerAlgorithm) -> Arc<dyn LoadBalancer> {
    match algorithm {
        LoadBalancerAlgorithm::LeastConnections => Arc::new(LeastConnectionsBalancer::new()),
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
    }
}
