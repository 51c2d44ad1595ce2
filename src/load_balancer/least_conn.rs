// src/load_balancer/least_conn.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Least connections, with ties broken by rotating through the tied set.
///
/// The cursor is a position inside the *current* tie set. Its value carries
/// over between calls even when the set changes shape, so a backend can be
/// skipped or revisited when the ties shift under load.
#[derive(Debug)]
pub struct LeastConnectionsBalancer {
    // usize::MAX so that the first tie resolves to candidate 0.
    cursor: Mutex<usize>,
}

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(usize::MAX),
        }
    }
}

impl Default for LeastConnectionsBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut cursor = self.cursor.lock();

        // Read each count once so the minimum and the tie set agree.
        let loads: Vec<(&Arc<Backend>, usize)> = backends
            .iter()
            .filter(|b| b.is_alive())
            .map(|b| (b, b.active_connections()))
            .collect();

        let min = loads.iter().map(|(_, n)| *n).min()?;
        let candidates: Vec<&Arc<Backend>> = loads
            .into_iter()
            .filter(|(_, n)| *n == min)
            .map(|(b, _)| b)
            .collect();

        if candidates.len() == 1 {
            return Some(candidates[0].clone());
        }

        *cursor = cursor.wrapping_add(1) % candidates.len();
        Some(candidates[*cursor].clone())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
