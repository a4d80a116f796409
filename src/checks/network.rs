// src/checks/network.rs
use crate::health::{Check, CheckError};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Passes when `port` can currently be bound.
///
/// The listener is dropped as soon as the bind succeeds, so the result is
/// only a snapshot; meant for start-up validation.
#[derive(Debug, Clone)]
pub struct PortAvailableCheck {
    host: IpAddr,
    port: u16,
}

impl PortAvailableCheck {
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        }
    }

    pub fn on_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }
}

#[async_trait]
impl Check for PortAvailableCheck {
    async fn check(&self) -> Result<(), CheckError> {
        let listener = TcpListener::bind(SocketAddr::new(self.host, self.port))
            .await
            .map_err(|source| CheckError::PortUnavailable {
                port: self.port,
                source,
            })?;
        drop(listener);
        Ok(())
    }
}

/// Passes when a TCP connection to `host:port` is established within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpCheck {
    address: String,
    timeout: Duration,
}

impl TcpCheck {
    pub fn new(host: impl AsRef<str>, port: u16, timeout: Duration) -> Self {
        let host = host.as_ref();
        // Bracket bare IPv6 literals so the address stays parseable.
        let address = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        Self { address, timeout }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Check for TcpCheck {
    async fn check(&self) -> Result<(), CheckError> {
        match timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(source)) => Err(CheckError::Connect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(CheckError::ConnectTimeout {
                address: self.address.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_port_in_use_fails() {
        let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let err = PortAvailableCheck::new(port).check().await.unwrap_err();

        assert!(matches!(err, CheckError::PortUnavailable { .. }));
        assert!(err
            .to_string()
            .starts_with(&format!("port {port} is not available: ")));
    }

    #[tokio::test]
    async fn test_free_port_passes_and_stays_free() {
        let port = {
            let probe = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        PortAvailableCheck::new(port).check().await.unwrap();

        // The probe must have released the port.
        let rebound = std::net::TcpListener::bind(("0.0.0.0", port));
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        TcpCheck::new("127.0.0.1", port, Duration::from_secs(1))
            .check()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tcp_refused() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };

        let err = TcpCheck::new("127.0.0.1", port, Duration::from_secs(1))
            .check()
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::Connect { .. }));
        assert!(err
            .to_string()
            .starts_with(&format!("failed to connect to 127.0.0.1:{port}")));
    }

    #[test]
    fn test_ipv6_address_bracketed() {
        let check = TcpCheck::new("::1", 9000, Duration::from_secs(1));
        assert_eq!(check.address(), "[::1]:9000");
        assert!(check.address().parse::<SocketAddr>().is_ok());
    }
}
