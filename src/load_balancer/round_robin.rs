// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Plain rotation over the alive backends, ignoring load.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let alive: Vec<&Arc<Backend>> = backends.iter().filter(|b| b.is_alive()).collect();
        if alive.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % alive.len();
        Some(alive[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
