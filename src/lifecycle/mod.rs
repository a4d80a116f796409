// src/lifecycle/mod.rs
mod manager;
mod signal;

pub use manager::{
    LifecycleConfig, LifecycleError, LifecycleManager, LifecycleState, ShutdownOutcome,
};
pub use signal::{shutdown_signal, ShutdownSignal};
