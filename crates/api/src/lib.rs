//! HTTP API: token protocol, auth gate and the `/token` routes.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
pub mod protocol;
