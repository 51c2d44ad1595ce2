//
// src/proxy/pool.rs
//

use super::backend::Backend;
use super::identity::{id_for_uri, IdentityError};
use crate::load_balancer::LoadBalancer;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("backend {0} is already registered")]
    Conflict(String),

    #[error("backend {0} not found")]
    NotFound(String),

    #[error("invalid backend: {0}")]
    InvalidInput(#[from] IdentityError),

    #[error("no alive backend available")]
    Unavailable,
}

/// Registry of backends keyed by their derived id.
///
/// Mutations (add, remove, status) take the write lock; lookups and
/// selection take the read lock. Selection runs on a snapshot after the
/// read lock is released, under the balancer's own lock.
pub struct BackendPool {
    backends: RwLock<HashMap<String, Arc<Backend>>>,
    balancer: Arc<dyn LoadBalancer>,
}

impl BackendPool {
    pub fn new(balancer: Arc<dyn LoadBalancer>, capacity: usize) -> Self {
        Self {
            backends: RwLock::new(HashMap::with_capacity(capacity)),
            balancer,
        }
    }

    pub fn balancer_name(&self) -> &'static str {
        self.balancer.name()
    }

    /// Register `backend` under the id derived from its host and port.
    ///
    /// A second backend for the same endpoint is rejected, not merged.
    pub fn add_server(&self, mut backend: Backend) -> Result<Arc<Backend>, PoolError> {
        let id = id_for_uri(backend.url())?;

        let mut backends = self.backends.write();
        if backends.contains_key(&id) {
            tracing::warn!(backend_id = %id, url = %backend.url(), "backend already registered");
            return Err(PoolError::Conflict(id));
        }

        backend.set_id(id.clone());
        let backend = Arc::new(backend);
        backends.insert(id, backend.clone());

        tracing::info!(backend_id = %backend.id(), url = %backend.url(), "added backend");
        Ok(backend)
    }

    pub fn remove_server(&self, id: &str) -> Result<Arc<Backend>, PoolError> {
        match self.backends.write().remove(id) {
            Some(backend) => {
                tracing::info!(backend_id = %id, url = %backend.url(), "removed backend");
                Ok(backend)
            }
            None => Err(not_found(id)),
        }
    }

    pub fn get_server(&self, id: &str) -> Result<Arc<Backend>, PoolError> {
        self.backends
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Snapshot of every registered backend, alive or not.
    pub fn list_servers(&self) -> Vec<Arc<Backend>> {
        self.backends.read().values().cloned().collect()
    }

    /// The only way liveness changes.
    pub fn update_server_status(&self, id: &str, alive: bool) -> Result<(), PoolError> {
        let backends = self.backends.write();
        let backend = backends.get(id).ok_or_else(|| not_found(id))?;

        if backend.is_alive() != alive {
            tracing::info!(backend_id = %id, alive, "backend status changed");
        }
        backend.set_alive(alive);
        Ok(())
    }

    /// Ask the balancer for a target. Advisory: the pick is not a reservation.
    pub fn select_server(&self) -> Result<Arc<Backend>, PoolError> {
        let snapshot = self.list_servers();
        self.balancer
            .select_backend(&snapshot)
            .ok_or(PoolError::Unavailable)
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alive_count(&self) -> usize {
        self.backends.read().values().filter(|b| b.is_alive()).count()
    }
}

fn not_found(id: &str) -> PoolError {
    tracing::warn!(backend_id = %id, "backend not found");
    PoolError::NotFound(id.to_string())
}
