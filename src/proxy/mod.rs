//
// src/proxy/mod.rs
//
mod backend;
mod identity;
mod pool;
mod proxy;

pub use backend::{Backend, ConnectionGuard, HttpClient};
pub use identity::{derive_id, parse_backend_url, IdentityError};
pub use pool::{BackendPool, PoolError};
pub use proxy::{Proxy, ProxyError, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO};
