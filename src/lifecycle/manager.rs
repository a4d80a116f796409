// src/lifecycle/manager.rs
use super::signal::shutdown_signal;
use crate::config::LifecycleSettings;
use crate::retry::{RetryConfig, RetryDecision, RetryError, RetryStrategy};
use crate::server::{Server, ServerError};
use hyper::{Body, Request, Response};
use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower::Service;
use tracing::{error, info, warn};

/// `Created → Starting → Running → {Failed | ShuttingDown} → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Failed,
    Closed,
}

impl LifecycleState {
    /// Whether `next` may follow `self`. Once shutting down or failed the
    /// only way on is `Closed`, and `Closed` is final.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Closed, _) => false,
            (ShuttingDown | Failed, next) => next == Closed,
            (Running, Starting | Created) => false,
            (Starting, Created) => false,
            (current, next) => current != next,
        }
    }
}

/// Applies `next` only if it is a legal successor of the current state.
/// Returns whether the state changed.
fn advance(state: &watch::Sender<LifecycleState>, next: LifecycleState) -> bool {
    state.send_if_modified(|current| {
        if current.can_advance_to(next) {
            *current = next;
            true
        } else {
            false
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight connection finished before the deadline.
    Graceful,
    /// The deadline elapsed and remaining connections were dropped.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub max_start_attempts: u32,
    pub retry_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: 3,
            retry_delay: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&LifecycleSettings> for LifecycleConfig {
    fn from(settings: &LifecycleSettings) -> Self {
        Self {
            max_start_attempts: settings.max_start_attempts,
            retry_delay: settings.retry_delay(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("server failed to start after {attempts} attempts: {source}")]
    StartupFailed {
        attempts: u32,
        #[source]
        source: ServerError,
    },

    /// Binding failed in a way another attempt cannot fix.
    #[error("server cannot start: {0}")]
    StartupRejected(#[source] ServerError),

    #[error("server task panicked: {0}")]
    ServerPanicked(String),
}

/// Owns the server from construction until it is closed, and reconciles
/// the three ways a run can end: graceful stop, server failure, signal.
pub struct LifecycleManager<H> {
    server: Server<H>,
    config: LifecycleConfig,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl<H> LifecycleManager<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(server: Server<H>, config: LifecycleConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            server,
            config,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve until SIGINT, SIGTERM or SIGQUIT, then drain.
    pub async fn run(self) -> Result<ShutdownOutcome, LifecycleError> {
        self.run_until(async {
            match shutdown_signal().await {
                Ok(signal) => {
                    info!(%signal, "Received signal, initiating graceful shutdown");
                }
                Err(err) => {
                    error!(%err, "Failed to install signal handlers");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Serve until `signal` resolves or the server fails, whichever is first.
    pub async fn run_until<F>(self, signal: F) -> Result<ShutdownOutcome, LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let LifecycleManager {
            server,
            config,
            state,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let retry = RetryStrategy::new(RetryConfig {
            max_attempts: config.max_start_attempts,
            delay: config.retry_delay,
        });

        advance(&state, LifecycleState::Starting);
        let mut serve_task = tokio::spawn(serve_with_retries(
            server,
            retry,
            shutdown_rx,
            state.clone(),
        ));

        tokio::pin!(signal);

        // Only the first path to complete decides the outcome.
        let outcome = tokio::select! {
            joined = &mut serve_task => match joined {
                // A serve loop that returns on its own has already drained.
                Ok(Ok(())) => Ok(ShutdownOutcome::Graceful),
                Ok(Err(err)) => {
                    advance(&state, LifecycleState::Failed);
                    error!(%err, "Server failed");
                    Err(err)
                }
                Err(err) => {
                    advance(&state, LifecycleState::Failed);
                    error!(%err, "Server task ended abnormally");
                    Err(LifecycleError::ServerPanicked(err.to_string()))
                }
            },
            _ = &mut signal => {
                advance(&state, LifecycleState::ShuttingDown);
                Ok(drain(serve_task, &shutdown_tx, config.shutdown_timeout).await)
            }
        };

        advance(&state, LifecycleState::Closed);
        outcome
    }
}

async fn serve_with_retries<H>(
    server: Server<H>,
    retry: RetryStrategy,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<LifecycleState>>,
) -> Result<(), LifecycleError>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    let max_attempts = retry.max_attempts();

    retry
        .execute_with_decision(
            move |attempt| {
                let server = server.clone();
                let shutdown = shutdown.clone();
                let state = state.clone();
                async move {
                    if *shutdown.borrow() {
                        // Shutdown was requested between attempts.
                        return Ok(());
                    }

                    info!(
                        "Starting server (attempt {}/{}) on {}",
                        attempt,
                        max_attempts,
                        server.addr()
                    );

                    let bound = server.bind().await?;
                    if !advance(&state, LifecycleState::Running) {
                        info!("Shutdown requested during start-up, not serving");
                        return Ok(());
                    }
                    info!("Server started successfully on {}", bound.local_addr());

                    bound.serve(shutdown).await;
                    Ok(())
                }
            },
            bind_retry_decision,
        )
        .await
        .map_err(|err| match err {
            RetryError::MaxAttemptsExceeded { attempts, last } => LifecycleError::StartupFailed {
                attempts,
                source: last,
            },
            RetryError::NonRetryable(source) => LifecycleError::StartupRejected(source),
        })
}

/// A port that is busy may free up; an address this host does not own, or
/// one the process may not bind, will not.
fn bind_retry_decision(err: &ServerError) -> RetryDecision {
    match err {
        ServerError::Bind { source, .. }
            if matches!(
                source.kind(),
                ErrorKind::PermissionDenied | ErrorKind::AddrNotAvailable
            ) =>
        {
            RetryDecision::NoRetry
        }
        _ => RetryDecision::Retry,
    }
}

/// Asks the server to stop and waits up to `deadline` for connections to
/// drain; on expiry the serve task is aborted, closing what is left.
async fn drain(
    mut serve_task: JoinHandle<Result<(), LifecycleError>>,
    shutdown_tx: &watch::Sender<bool>,
    deadline: Duration,
) -> ShutdownOutcome {
    info!(?deadline, "Initiating graceful shutdown");
    shutdown_tx.send_replace(true);

    match timeout(deadline, &mut serve_task).await {
        Ok(joined) => {
            match joined {
                Ok(Ok(())) => info!("Server shutdown completed successfully"),
                Ok(Err(err)) => warn!(%err, "Server reported an error while shutting down"),
                Err(err) => warn!(%err, "Server task ended abnormally while shutting down"),
            }
            ShutdownOutcome::Graceful
        }
        Err(_) => {
            warn!(?deadline, "Graceful shutdown timed out, forcing server close");
            serve_task.abort();
            if let Err(err) = serve_task.await {
                if !err.is_cancelled() {
                    warn!(%err, "Server task ended abnormally while being aborted");
                }
            }
            ShutdownOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let settings = LifecycleSettings {
            shutdown_timeout_secs: 5,
            max_start_attempts: 4,
            retry_delay_ms: 250,
        };

        let config = LifecycleConfig::from(&settings);

        assert_eq!(config.max_start_attempts, 4);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_states_never_move_backwards() {
        use LifecycleState::*;

        assert!(Created.can_advance_to(Starting));
        assert!(Starting.can_advance_to(Running));
        assert!(Running.can_advance_to(ShuttingDown));
        assert!(Starting.can_advance_to(Failed));
        assert!(ShuttingDown.can_advance_to(Closed));
        assert!(Failed.can_advance_to(Closed));

        assert!(!ShuttingDown.can_advance_to(Running));
        assert!(!ShuttingDown.can_advance_to(Starting));
        assert!(!Failed.can_advance_to(Running));
        assert!(!Running.can_advance_to(Starting));
        for next in [Created, Starting, Running, ShuttingDown, Failed, Closed] {
            assert!(!Closed.can_advance_to(next));
        }
    }

    #[test]
    fn test_late_running_is_ignored_after_shutdown() {
        let (state, rx) = watch::channel(LifecycleState::Starting);

        assert!(advance(&state, LifecycleState::ShuttingDown));
        assert!(!advance(&state, LifecycleState::Running));
        assert_eq!(*rx.borrow(), LifecycleState::ShuttingDown);

        assert!(advance(&state, LifecycleState::Closed));
        assert!(!advance(&state, LifecycleState::Running));
        assert_eq!(*rx.borrow(), LifecycleState::Closed);
    }

    #[test]
    fn test_bind_retry_decision() {
        let bind_err = |kind: ErrorKind| ServerError::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: std::io::Error::from(kind),
        };

        assert_eq!(
            bind_retry_decision(&bind_err(ErrorKind::AddrInUse)),
            RetryDecision::Retry
        );
        assert_eq!(
            bind_retry_decision(&bind_err(ErrorKind::PermissionDenied)),
            RetryDecision::NoRetry
        );
        assert_eq!(
            bind_retry_decision(&bind_err(ErrorKind::AddrNotAvailable)),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();

        assert_eq!(config.max_start_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }
}
