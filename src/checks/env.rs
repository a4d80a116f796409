// src/checks/env.rs
use crate::health::{Check, CheckError};
use async_trait::async_trait;

/// Fails on the first variable that is unset or empty.
#[derive(Debug, Clone, Default)]
pub struct EnvVarCheck {
    names: Vec<String>,
}

impl EnvVarCheck {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Check for EnvVarCheck {
    async fn check(&self) -> Result<(), CheckError> {
        for name in &self.names {
            match std::env::var_os(name) {
                Some(value) if !value.is_empty() => {}
                _ => return Err(CheckError::MissingEnv(name.clone())),
            }
        }
        Ok(())
    }
}
