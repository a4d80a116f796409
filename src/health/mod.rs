// src/health/mod.rs
mod check;
mod registry;
mod status;

pub use check::{check_fn, Check, CheckError, FnCheck, SharedCheck};
pub(crate) use registry::panic_message;
pub use registry::HealthRegistry;
pub use status::{
    format_uptime, AggregateResult, CheckCategory, HealthState, ServiceIdentity, CHECK_OK,
    DEFAULT_CHECK, FAILED_PREFIX,
};
