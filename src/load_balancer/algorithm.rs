// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use std::sync::Arc;

/// Picks one backend out of a pool snapshot.
///
/// Implementations see every registered backend, alive or not, and must
/// skip the dead ones themselves. Selection runs on the request path and
/// must not block.
pub trait LoadBalancer: Send + Sync {
    fn select_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
