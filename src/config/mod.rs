// src/config/mod.rs
mod models;

pub use models::*;

use crate::checks::{EnvVarCheck, HttpCheck, PortAvailableCheck, TcpCheck};
use crate::health::{Check, CheckError, HealthRegistry};
use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tracing::{info, warn};

pub const ENV_PREFIX: &str = "LIFELINE";
pub const PORT_ENV: &str = "PORT";

/// Configuration problems detected before the transport starts. All fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen host {0:?}")]
    InvalidHost(String),

    #[error("port {port} is already in use: {source}")]
    PortInUse {
        port: u16,
        #[source]
        source: CheckError,
    },

    #[error(transparent)]
    MissingEnv(CheckError),

    #[error("invalid dependency {name:?}: {reason}")]
    InvalidDependency { name: String, reason: String },
}

/// Load settings from an optional file, then `LIFELINE_*` environment
/// variables, then `PORT`.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        info!("Loading configuration from: {}", path.display());
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("checks.required_env")
            .try_parsing(true),
    );

    let mut settings: Settings = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    let raw_port = std::env::var(PORT_ENV).ok();
    settings.server.port = resolve_port(raw_port.as_deref(), settings.server.port);

    Ok(settings)
}

/// `PORT` wins when it holds a usable port number; anything else falls back.
pub fn resolve_port(raw: Option<&str>, fallback: u16) -> u16 {
    match raw.map(str::trim) {
        None | Some("") => fallback,
        Some(value) => match value.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                warn!(value = %value, fallback, "ignoring invalid {PORT_ENV}");
                fallback
            }
        },
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))?;
        Ok(SocketAddr::new(host, self.port))
    }
}

/// Start-up validation: the listen port must be free and every required
/// variable present.
pub async fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let addr = settings.server.socket_addr()?;

    PortAvailableCheck::new(addr.port())
        .on_host(addr.ip())
        .check()
        .await
        .map_err(|source| ConfigError::PortInUse {
            port: addr.port(),
            source,
        })?;

    EnvVarCheck::new(settings.checks.required_env.iter().cloned())
        .check()
        .await
        .map_err(ConfigError::MissingEnv)?;

    info!(port = addr.port(), "Configuration validated");
    Ok(())
}

/// Registers the configured dependencies (and required variables) as
/// readiness checks.
pub fn register_checks(
    checks: &ChecksConfig,
    registry: &HealthRegistry,
) -> Result<(), ConfigError> {
    if !checks.required_env.is_empty() {
        registry.register_readiness(
            "environment",
            EnvVarCheck::new(checks.required_env.iter().cloned()),
        );
    }

    // One pool for every HTTP dependency.
    let client = reqwest::Client::new();

    for dependency in &checks.dependencies {
        match &dependency.probe {
            ProbeConfig::Tcp { host, port } => {
                registry.register_readiness(
                    dependency.name.clone(),
                    TcpCheck::new(host, *port, dependency.timeout()),
                );
            }
            ProbeConfig::Http {
                url,
                expected_status,
            } => {
                let check = HttpCheck::new(url, dependency.timeout(), *expected_status)
                    .map_err(|err| ConfigError::InvalidDependency {
                        name: dependency.name.clone(),
                        reason: err.to_string(),
                    })?
                    .with_client(client.clone());
                registry.register_readiness(dependency.name.clone(), check);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CheckCategory;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_resolve_port() {
        assert_eq!(resolve_port(None, 8080), 8080);
        assert_eq!(resolve_port(Some(""), 8080), 8080);
        assert_eq!(resolve_port(Some("9090"), 8080), 9090);
        assert_eq!(resolve_port(Some(" 9090 "), 8080), 9090);
        assert_eq!(resolve_port(Some("http"), 8080), 8080);
        assert_eq!(resolve_port(Some("0"), 8080), 8080);
        assert_eq!(resolve_port(Some("70000"), 8080), 8080);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, DEFAULT_PORT);
        assert_eq!(settings.lifecycle.max_start_attempts, 3);
        assert_eq!(settings.lifecycle.retry_delay().as_secs(), 2);
        assert_eq!(settings.lifecycle.shutdown_timeout().as_secs(), 30);
        assert_eq!(settings.service.name, "lifeline");
        assert_eq!(settings.server.read_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(settings.server.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let server = ServerConfig {
            read_timeout_secs: 0,
            ..ServerConfig::default()
        };

        assert_eq!(server.read_timeout(), None);
        assert_eq!(server.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_load_yaml_file() {
        let path = std::env::temp_dir()
            .join(format!("lifeline-config-{}.yaml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
service:
  name: "api"
  version: "1.2.3"
lifecycle:
  shutdown_timeout_secs: 5
checks:
  required_env: ["HOME"]
  dependencies:
    - name: clickhouse
      kind: tcp
      host: clickhouse
      port: 9000
    - name: auth
      kind: http
      url: "http://auth.internal/health"
      timeout_ms: 500
"#
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.service.name, "api");
        assert_eq!(settings.service.version, "1.2.3");
        assert_eq!(settings.lifecycle.shutdown_timeout_secs, 5);
        assert_eq!(settings.lifecycle.max_start_attempts, 3);
        assert_eq!(settings.checks.required_env, vec!["HOME"]);
        assert_eq!(settings.checks.dependencies.len(), 2);
        assert_eq!(
            settings.checks.dependencies[0].probe,
            ProbeConfig::Tcp {
                host: "clickhouse".to_string(),
                port: 9000
            }
        );
        assert_eq!(settings.checks.dependencies[0].timeout_ms, 2000);
        assert_eq!(
            settings.checks.dependencies[1].probe,
            ProbeConfig::Http {
                url: "http://auth.internal/health".to_string(),
                expected_status: 200
            }
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("lifeline-does-not-exist.yaml");
        assert!(load_settings(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn test_validate_rejects_occupied_port() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = held.local_addr().unwrap().port();

        let err = validate(&settings).await.unwrap_err();
        assert!(matches!(err, ConfigError::PortInUse { .. }));
    }

    #[tokio::test]
    async fn test_validate_rejects_missing_env() {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        settings.checks.required_env = vec!["LIFELINE_TEST_CONFIG_MISSING".to_string()];
        std::env::remove_var("LIFELINE_TEST_CONFIG_MISSING");

        let err = validate(&settings).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "required environment variable LIFELINE_TEST_CONFIG_MISSING is not set"
        );
    }

    #[test]
    fn test_invalid_host() {
        let mut server = ServerConfig::default();
        server.host = "not-an-ip".to_string();
        assert!(matches!(server.socket_addr(), Err(ConfigError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn test_register_checks() {
        let registry = HealthRegistry::new("svc", "0.1.0");
        let checks = ChecksConfig {
            required_env: vec!["HOME".to_string()],
            dependencies: vec![DependencyConfig {
                name: "clickhouse".to_string(),
                probe: ProbeConfig::Tcp {
                    host: "127.0.0.1".to_string(),
                    port: 1,
                },
                timeout_ms: 200,
            }],
        };

        register_checks(&checks, &registry).unwrap();

        assert_eq!(
            registry.check_names(CheckCategory::Readiness),
            vec!["clickhouse", "environment"]
        );
        assert!(registry.check_names(CheckCategory::Liveness).is_empty());
    }

    #[tokio::test]
    async fn test_registered_http_dependencies_share_a_client() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/auth")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/billing")
            .with_status(500)
            .create_async()
            .await;

        let http = |name: &str| DependencyConfig {
            name: name.to_string(),
            probe: ProbeConfig::Http {
                url: format!("{}/{name}", server.url()),
                expected_status: 200,
            },
            timeout_ms: 1000,
        };
        let checks = ChecksConfig {
            required_env: Vec::new(),
            dependencies: vec![http("auth"), http("billing")],
        };
        let registry = HealthRegistry::new("svc", "0.1.0");
        register_checks(&checks, &registry).unwrap();

        let result = registry.evaluate(CheckCategory::Readiness).await;

        assert!(!result.is_healthy());
        assert_eq!(result.checks["auth"], "ok");
        assert!(result.checks["billing"].contains("got 500, expected 200"));
    }

    #[test]
    fn test_register_checks_rejects_bad_url() {
        let registry = HealthRegistry::new("svc", "0.1.0");
        let checks = ChecksConfig {
            required_env: Vec::new(),
            dependencies: vec![DependencyConfig {
                name: "auth".to_string(),
                probe: ProbeConfig::Http {
                    url: "::nope".to_string(),
                    expected_status: 200,
                },
                timeout_ms: 200,
            }],
        };

        let err = register_checks(&checks, &registry).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependency { name, .. } if name == "auth"));
    }
}
