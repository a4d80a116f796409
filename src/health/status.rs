// src/health/status.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const CHECK_OK: &str = "ok";
pub const FAILED_PREFIX: &str = "failed: ";
/// Entry reported when a category has no registered checks.
pub const DEFAULT_CHECK: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckCategory {
    /// Should the process be restarted if failing?
    Liveness,
    /// Should the process receive traffic right now?
    Readiness,
}

impl CheckCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::Liveness => "liveness",
            CheckCategory::Readiness => "readiness",
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// Immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    started: std::time::Instant,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            started_at: Utc::now(),
            started: std::time::Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome of evaluating one category, computed fresh on every call.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub status: HealthState,
    pub checks: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AggregateResult {
    /// Builds the aggregate from per-check outcomes. An empty set is healthy
    /// and reported as a single `default: ok` entry.
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<(), String>)>,
    {
        let mut checks = BTreeMap::new();
        let mut failed = false;

        for (name, outcome) in outcomes {
            let entry = match outcome {
                Ok(()) => CHECK_OK.to_string(),
                Err(cause) => {
                    failed = true;
                    format!("{FAILED_PREFIX}{cause}")
                }
            };
            checks.insert(name, entry);
        }

        if checks.is_empty() {
            checks.insert(DEFAULT_CHECK.to_string(), CHECK_OK.to_string());
        }

        Self {
            status: if failed {
                HealthState::Unhealthy
            } else {
                HealthState::Healthy
            },
            checks,
            timestamp: Utc::now(),
            uptime: None,
            service: None,
            version: None,
        }
    }

    pub fn with_identity(mut self, identity: &ServiceIdentity) -> Self {
        self.service = Some(identity.name.clone());
        self.version = Some(identity.version.clone());
        self.uptime = Some(format_uptime(identity.uptime()));
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

fn serialize_rfc3339<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Human-readable duration, e.g. `1h2m3.004s`, `12.5ms`.
pub fn format_uptime(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let millis = d.subsec_millis();

    if total == 0 {
        return match millis {
            0 => format!("{}µs", d.as_micros()),
            _ => format!("{}.{}ms", millis, d.subsec_micros() % 1000 / 100),
        };
    }

    let secs = if millis == 0 {
        format!("{seconds}s")
    } else {
        format!("{seconds}.{millis:03}s")
    };

    match (hours, minutes) {
        (0, 0) => secs,
        (0, m) => format!("{m}m{secs}"),
        (h, m) => format!("{h}h{m}m{secs}"),
    }
}
