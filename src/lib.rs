// src/lib.rs
pub mod config;
pub mod demo;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod server;
