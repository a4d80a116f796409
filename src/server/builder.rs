// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use crate::metrics::MetricsCollector;
use crate::server::listener::bind_tcp;
use crate::server::ServerError;
use futures::future::BoxFuture;
use hyper::{server::conn::Http, Body, Request, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::Service;
use tracing::{debug, info, warn};

/// Pause after a failed `accept` (fd exhaustion, aborted handshakes) before
/// accepting again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Per-connection limits. `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Deadline for receiving a complete request head.
    pub header_read: Option<Duration>,
    /// How long a connection may sit with no request in flight.
    pub idle: Option<Duration>,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            header_read: Some(Duration::from_secs(15)),
            idle: Some(Duration::from_secs(60)),
        }
    }
}

/// Builder pattern so `main.rs` can inject its handler (or any tower service).
pub struct ServerBuilder<H> {
    addr: SocketAddr,
    handler: Option<H>,
    metrics: Option<Arc<MetricsCollector>>,
    timeouts: ConnectionTimeouts,
}

impl<H> ServerBuilder<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handler: None,
            metrics: None,
            timeouts: ConnectionTimeouts::default(),
        }
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<Server<H>, ServerError> {
        let handler = self.handler.ok_or(ServerError::MissingHandler)?;
        Ok(Server {
            addr: self.addr,
            handler,
            metrics: self.metrics,
            timeouts: self.timeouts,
        })
    }
}

/// A configured but not yet listening server. Cheap to clone so every
/// start-up attempt can bind afresh.
#[derive(Clone)]
pub struct Server<H> {
    addr: SocketAddr,
    handler: H,
    metrics: Option<Arc<MetricsCollector>>,
    timeouts: ConnectionTimeouts,
}

impl<H> Server<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Takes `self` so the bind future owns the handler and stays `Send`
    /// for handlers that are not `Sync`.
    pub async fn bind(self) -> Result<BoundServer<H>, ServerError> {
        let Server {
            addr,
            handler,
            metrics,
            timeouts,
        } = self;

        let listener = bind_tcp(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(BoundServer {
            listener,
            local_addr,
            handler,
            metrics,
            timeouts,
        })
    }
}

pub struct BoundServer<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: H,
    metrics: Option<Arc<MetricsCollector>>,
    timeouts: ConnectionTimeouts,
}

impl<H> BoundServer<H>
where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` flips to `true`, then closes the
    /// listener and waits for in-flight connections to finish.
    ///
    /// A failed `accept` never ends the loop; it is logged and retried after
    /// [`ACCEPT_BACKOFF`]. Dropping this future aborts every connection task,
    /// which is how a forced close is performed.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let BoundServer {
            listener,
            local_addr,
            handler,
            metrics,
            timeouts,
        } = self;
        let mut connections = JoinSet::new();

        info!("HTTP server listening on {}", local_addr);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            handler.clone(),
                            shutdown.clone(),
                            metrics.clone(),
                            timeouts,
                        ));
                    }
                    Err(err) => {
                        if !backoff_after_accept_error(&err, &mut shutdown).await {
                            break;
                        }
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Owner went away without signalling; treat as shutdown.
                        break;
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }
            }
        }

        drop(listener);
        info!(
            %local_addr,
            in_flight = connections.len(),
            "Listener closed, draining connections"
        );

        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }

        info!(%local_addr, "All connections drained");
    }
}

/// Sleeps for [`ACCEPT_BACKOFF`] unless shutdown is requested first. Returns
/// `false` once the shutdown sender is gone.
async fn backoff_after_accept_error(
    err: &std::io::Error,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    warn!(%err, backoff = ?ACCEPT_BACKOFF, "Failed to accept connection");
    tokio::select! {
        _ = sleep(ACCEPT_BACKOFF) => true,
        changed = shutdown.changed() => changed.is_ok(),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            warn!(%err, "connection task panicked");
        }
    }
}

/// Keeps the connection gauge honest even when the task is aborted.
struct ConnectionGuard(Option<Arc<MetricsCollector>>);

impl ConnectionGuard {
    fn new(metrics: Option<Arc<MetricsCollector>>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.increment_active_connections();
        }
        Self(metrics)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(metrics) = &self.0 {
            metrics.decrement_active_connections();
        }
    }
}

/// Request activity on one connection, read by the idle timer.
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.opened.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(last)
    }
}

struct InFlight(Arc<Activity>);

impl InFlight {
    fn start(activity: Arc<Activity>) -> Self {
        activity.in_flight.fetch_add(1, Ordering::AcqRel);
        activity.touch();
        Self(activity)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Wraps the handler for a single connection to record request activity.
#[derive(Clone)]
struct Tracked<H> {
    inner: H,
    activity: Arc<Activity>,
}

impl<H> Service<Request<Body>> for Tracked<H>
where
    H: Service<Request<Body>, Response = Response<Body>>,
    H::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = H::Error;
    type Future = BoxFuture<'static, Result<Response<Body>, H::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let guard = InFlight::start(self.activity.clone());
        let fut = self.inner.call(req);
        Box::pin(async move {
            let res = fut.await;
            drop(guard);
            res
        })
    }
}

async fn serve_connection<H>(
    stream: TcpStream,
    peer: SocketAddr,
    svc: H,
    mut shutdown: watch::Receiver<bool>,
    metrics: Option<Arc<MetricsCollector>>,
    timeouts: ConnectionTimeouts,
) where
    H: Service<Request<Body>, Response = Response<Body>> + Send + Clone + 'static,
    H::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    H::Future: Send + 'static,
{
    let _guard = ConnectionGuard::new(metrics);
    let activity = Arc::new(Activity::new());
    let svc = Tracked {
        inner: svc,
        activity: activity.clone(),
    };

    let mut http = Http::new();
    if let Some(header_read) = timeouts.header_read {
        http.http1_header_read_timeout(header_read);
    }
    let conn = http.serve_connection(stream, svc);
    tokio::pin!(conn);

    let mut draining = *shutdown.borrow();
    if draining {
        conn.as_mut().graceful_shutdown();
    }

    loop {
        let idle_check = match timeouts.idle {
            Some(idle) if !draining && activity.busy() => idle,
            Some(idle) if !draining => idle.saturating_sub(activity.idle_for()),
            _ => Duration::MAX,
        };

        tokio::select! {
            res = conn.as_mut() => {
                if let Err(err) = res {
                    warn!(%peer, %err, "connection error");
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                debug!(%peer, "draining connection");
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
            _ = sleep(idle_check), if idle_check != Duration::MAX => {
                let expired = timeouts
                    .idle
                    .map_or(false, |idle| activity.idle_for() >= idle);
                if expired && !activity.busy() {
                    debug!(%peer, "closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        }
    }
}
