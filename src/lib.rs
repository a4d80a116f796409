// src/lib.rs
//! Health-check registry and graceful service lifecycle.
//!
//! Register liveness and readiness checks on a [`health::HealthRegistry`],
//! expose them through [`server::HealthService`], and let a
//! [`lifecycle::LifecycleManager`] start the server with bounded retry and
//! drain it on SIGINT/SIGTERM/SIGQUIT.
pub mod checks;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod server;
