// src/health/registry.rs
use super::check::{Check, CheckError, SharedCheck};
use super::status::{AggregateResult, CheckCategory, ServiceIdentity};
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Two independent sets of named checks (liveness and readiness), each
/// reducible on demand to an [`AggregateResult`].
///
/// Owned explicitly and shared by `Arc`; there is no process-wide instance,
/// so any number of registries can coexist (one per test, for instance).
pub struct HealthRegistry {
    identity: ServiceIdentity,
    liveness: DashMap<String, SharedCheck>,
    readiness: DashMap<String, SharedCheck>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthRegistry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identity: ServiceIdentity::new(name, version),
            liveness: DashMap::new(),
            readiness: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn checks(&self, category: CheckCategory) -> &DashMap<String, SharedCheck> {
        match category {
            CheckCategory::Liveness => &self.liveness,
            CheckCategory::Readiness => &self.readiness,
        }
    }

    /// Inserts or replaces the check registered under `name`. Last write wins.
    pub fn register<C>(&self, category: CheckCategory, name: impl Into<String>, check: C)
    where
        C: Check + 'static,
    {
        let name = name.into();
        let shared: SharedCheck = Arc::new(check);
        if self.checks(category).insert(name.clone(), shared).is_some() {
            debug!(%category, check = %name, "replaced existing check");
        } else {
            debug!(%category, check = %name, "registered check");
        }
    }

    pub fn register_liveness<C: Check + 'static>(&self, name: impl Into<String>, check: C) {
        self.register(CheckCategory::Liveness, name, check)
    }

    pub fn register_readiness<C: Check + 'static>(&self, name: impl Into<String>, check: C) {
        self.register(CheckCategory::Readiness, name, check)
    }

    pub fn check_names(&self, category: CheckCategory) -> Vec<String> {
        let mut names: Vec<String> = self
            .checks(category)
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Runs every check in `category` and aggregates the outcomes.
    ///
    /// Checks run concurrently in no particular order. A failing or panicking
    /// check only affects its own entry.
    pub async fn evaluate(&self, category: CheckCategory) -> AggregateResult {
        // Snapshot first: no shard guard may be held across an await.
        let snapshot: Vec<(String, SharedCheck)> = self
            .checks(category)
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let runs = snapshot.into_iter().map(|(name, check)| async move {
            let start = Instant::now();
            let outcome = run_isolated(check.as_ref()).await;
            (name, outcome, start.elapsed())
        });
        let results = futures::future::join_all(runs).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (name, outcome, elapsed) in results {
            match &outcome {
                Ok(()) => debug!(%category, check = %name, ?elapsed, "check passed"),
                Err(err) => warn!(%category, check = %name, ?elapsed, error = %err, "check failed"),
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_check(category.as_str(), &name, outcome.is_ok(), elapsed);
            }
            outcomes.push((name, outcome.map_err(|e| e.to_string())));
        }

        let mut result = AggregateResult::from_outcomes(outcomes);
        if category == CheckCategory::Liveness {
            result = result.with_identity(&self.identity);
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_health_status(category.as_str(), result.is_healthy());
        }

        result
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn uptime(&self) -> Duration {
        self.identity.uptime()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.identity.started_at
    }
}

/// Builds and polls the check inside the unwind boundary, so a panic while
/// creating the future is caught as well as one raised while polling it.
async fn run_isolated(check: &dyn Check) -> Result<(), CheckError> {
    match AssertUnwindSafe(async move { check.check().await })
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(payload) => Err(CheckError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
