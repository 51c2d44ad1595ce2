// src/demo/mod.rs
//! Toy backends for local runs: each answers every request with a greeting
//! naming its port.

mod hello;

pub use hello::{spawn_hello_server, spawn_hello_servers, HelloHandler};
