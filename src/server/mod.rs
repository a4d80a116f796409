pub mod builder;
pub mod handler;
pub mod listener;
pub mod recover;

pub use builder::{BoundServer, ConnectionTimeouts, Server, ServerBuilder, ACCEPT_BACKOFF};
pub use handler::{HealthService, HEALTH_PATH, METRICS_PATH, READY_PATH, REQUEST_ID_HEADER};
pub use recover::{CatchPanic, CatchPanicLayer};

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no request handler configured")]
    MissingHandler,
}
