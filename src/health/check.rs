// src/health/check.rs
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A named probe's outcome when it is not healthy.
///
/// The `Display` form is what ends up after `"failed: "` in an aggregate result.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("port {port} is not available: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("HTTP request failed to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code from {url}: got {actual}, expected {expected}")]
    UnexpectedStatus {
        url: String,
        actual: u16,
        expected: u16,
    },

    #[error("required environment variable {0} is not set")]
    MissingEnv(String),

    #[error("{name} check {position} failed: {source}")]
    Composite {
        name: String,
        position: usize,
        #[source]
        source: Box<CheckError>,
    },

    #[error("check panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Message(String),
}

impl CheckError {
    /// Free-form failure for caller-defined checks.
    pub fn msg(message: impl Into<String>) -> Self {
        CheckError::Message(message.into())
    }
}

/// A zero-argument probe. Implementations must be side-effect free and
/// independent of each other: the registry gives no ordering guarantee.
#[async_trait]
pub trait Check: Send + Sync {
    async fn check(&self) -> Result<(), CheckError>;
}

pub type SharedCheck = Arc<dyn Check>;

#[async_trait]
impl Check for SharedCheck {
    async fn check(&self) -> Result<(), CheckError> {
        self.as_ref().check().await
    }
}

/// Adapts an async closure into a [`Check`].
pub struct FnCheck<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Check for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CheckError>> + Send,
{
    async fn check(&self) -> Result<(), CheckError> {
        (self.f)().await
    }
}

pub fn check_fn<F, Fut>(f: F) -> FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), CheckError>> + Send,
{
    FnCheck { f }
}
