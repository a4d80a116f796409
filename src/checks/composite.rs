// src/checks/composite.rs
use crate::health::{Check, CheckError, SharedCheck};
use async_trait::async_trait;
use std::sync::Arc;

/// Runs its members in order and stops at the first failure.
///
/// This is the only place where evaluation order is guaranteed.
pub struct CompositeCheck {
    name: String,
    checks: Vec<SharedCheck>,
}

impl CompositeCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn with<C: Check + 'static>(mut self, check: C) -> Self {
        self.checks.push(Arc::new(check));
        self
    }
}

#[async_trait]
impl Check for CompositeCheck {
    async fn check(&self) -> Result<(), CheckError> {
        for (i, check) in self.checks.iter().enumerate() {
            if let Err(err) = check.check().await {
                return Err(CheckError::Composite {
                    name: self.name.clone(),
                    position: i + 1,
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }
}
