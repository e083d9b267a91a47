//! Error handlers
//!
//! A handler decides what a failed action means for the run. The group
//! calls it once per failing host, after wrapping the error with the host
//! and task names.

use std::sync::Arc;

use herd_core::config::ErrorPolicy;

use crate::error::TaskError;

/// Callback invoked with every failure of a run
pub type ErrorHandler = Arc<dyn Fn(TaskError) + Send + Sync>;

/// Log the failure and abort by panicking. This is the default.
pub fn panic() -> ErrorHandler {
    Arc::new(|err: TaskError| {
        tracing::error!(host = %err.host, task = %err.task, "{:#}", err.source);
        panic!("{}", err);
    })
}

/// Log the failure and carry on
pub fn ignore() -> ErrorHandler {
    Arc::new(|err: TaskError| {
        tracing::warn!(host = %err.host, task = %err.task, "{:#}", err.source);
    })
}

/// Handler for a configured policy
pub fn from_policy(policy: ErrorPolicy) -> ErrorHandler {
    match policy {
        ErrorPolicy::Panic => panic(),
        ErrorPolicy::Ignore => ignore(),
    }
}
