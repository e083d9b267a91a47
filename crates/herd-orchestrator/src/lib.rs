//! herd-orchestrator: run actions across a group of hosts
//!
//! A [`Group`] applies an [`Action`] to every host concurrently and routes
//! failures to an error handler. Built-in actions cover shell commands
//! ([`Shell`]) and file transfer in both directions ([`Upload`],
//! [`Download`]). Hosts come from any transport implementing
//! [`herd_core::Host`]; [`Group::connect`] builds a group over SSH.

pub mod action;
#[cfg(unix)]
pub mod copy;
pub mod error;
pub mod group;
pub mod handlers;
pub mod shell;
pub mod task;

pub use action::{from_fn, Action, FnAction};
#[cfg(unix)]
pub use copy::{Download, Upload};
pub use error::{CopyError, TaskError};
pub use group::{Group, RunSummary};
pub use handlers::ErrorHandler;
pub use shell::{execute, sink, OutputSink, Shell};
pub use task::Task;
