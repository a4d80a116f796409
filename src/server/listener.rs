// ────────────────────────────────
// src/server/listener.rs
// Binds the listener and tags failures with the address.
// ────────────────────────────────
use super::ServerError;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}
