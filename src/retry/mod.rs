// src/retry/mod.rs
mod strategy;

pub use strategy::{RetryConfig, RetryDecision, RetryError, RetryStrategy};
