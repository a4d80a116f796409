// src/checks/mod.rs
//! Ready-made checks for common dependencies. Each is a plain value with no
//! shared state and can be registered under any name in either category.
mod composite;
mod env;
mod http;
mod network;

pub use composite::CompositeCheck;
pub use env::EnvVarCheck;
pub use http::HttpCheck;
pub use network::{PortAvailableCheck, TcpCheck};

use crate::health::{Check, CheckError};
use async_trait::async_trait;

/// Constant success, for when there is no real dependency to probe yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl Check for AlwaysHealthy {
    async fn check(&self) -> Result<(), CheckError> {
        Ok(())
    }
}
