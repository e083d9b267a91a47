//! Group orchestration
//!
//! A [`Group`] runs one action on every host at once and waits for all of
//! them. Each run gets a single cancellation token shared by every host;
//! it fires when the run's timeout elapses. Actions are expected to honor
//! it: the group never abandons a host, it only waits.
//!
//! Failures are wrapped into a [`TaskError`] naming the host and task and
//! handed to the run's error handler as they arrive. The default handler
//! panics; with [`handlers::ignore`] the run continues and the failure is
//! only logged. A failing host never stops the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use herd_core::config::{RunConfig, UserEnv, DEFAULT_TIMEOUT};
use herd_core::error::CloseError;
use herd_core::traits::Host;
use herd_ssh::ConnectionError;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::error::TaskError;
use crate::handlers::{self, ErrorHandler};
use crate::task::Task;

/// Outcome of one run across a group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub task: String,
    /// Number of hosts the action was applied to
    pub hosts: usize,
    pub succeeded: usize,
    /// Names of the hosts whose action failed
    pub failed: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A set of connected hosts that actions are applied to together
pub struct Group {
    hosts: Vec<Arc<dyn Host>>,
    on_error: ErrorHandler,
    timeout: Duration,
}

impl Group {
    /// Group over `hosts`, with the panicking handler and a 30 second timeout.
    ///
    /// Host names should be unique; downloads use them to keep results
    /// from different hosts apart.
    pub fn new(hosts: Vec<Arc<dyn Host>>) -> Self {
        Self {
            hosts,
            on_error: handlers::panic(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Connect every host named in `config` over SSH and apply its timeout
    /// and error policy
    pub async fn connect(config: &RunConfig, env: &UserEnv) -> Result<Self, ConnectionError> {
        let hosts =
            herd_ssh::connect_group(&config.hosts, config.ssh_config.as_deref(), env).await?;
        Ok(Self::new(hosts)
            .with_timeout(config.timeout)
            .with_error_handler(handlers::from_policy(config.on_error)))
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn hosts(&self) -> &[Arc<dyn Host>] {
        &self.hosts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply `action` to every host under the group's handler and timeout
    pub async fn run(&self, name: impl Into<String>, action: impl Action + 'static) -> RunSummary {
        self.run_task(Task::new(name, action)).await
    }

    /// Apply a task to every host and wait until each has reported
    pub async fn run_task(&self, task: Task) -> RunSummary {
        let handler = task.on_error.unwrap_or_else(|| self.on_error.clone());
        let timeout = task.timeout.unwrap_or(self.timeout);
        let name = task.name;

        let cancel = CancellationToken::new();
        // cancels the run if the caller stops waiting, e.g. on a handler panic
        let _guard = cancel.clone().drop_guard();
        let deadline = {
            let cancel = cancel.clone();
            let name = name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::debug!(task = %name, "Timeout of {:?} reached, cancelling", timeout);
                cancel.cancel();
            })
        };

        tracing::debug!(task = %name, "Running on {} host(s)", self.hosts.len());
        let mut pending: FuturesUnordered<_> = self
            .hosts
            .iter()
            .map(|host| {
                let host_name = host.name().to_string();
                let handle = tokio::spawn({
                    let action = Arc::clone(&task.action);
                    let host = Arc::clone(host);
                    let cancel = cancel.clone();
                    async move { action.apply(cancel, host).await }
                });
                async move { (host_name, handle.await) }
            })
            .collect();

        let mut summary = RunSummary {
            task: name.clone(),
            hosts: self.hosts.len(),
            ..Default::default()
        };
        while let Some((host, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("action did not complete: {}", e)),
            };
            match result {
                Ok(()) => {
                    tracing::debug!(host = %host, task = %name, "Done");
                    summary.succeeded += 1;
                }
                Err(source) => {
                    summary.failed.push(host.clone());
                    handler(TaskError {
                        task: name.clone(),
                        host,
                        source,
                    });
                }
            }
        }

        deadline.abort();
        summary
    }

    /// Close every host concurrently, collecting all failures
    pub async fn close(&self) -> Result<(), CloseError> {
        let results = join_all(self.hosts.iter().map(|host| async move {
            (host.name().to_string(), host.close().await)
        }))
        .await;

        let mut errors = CloseError::default();
        for (name, result) in results {
            if let Err(e) = result {
                errors.absorb(&name, e);
            }
        }
        errors.into_result()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.hosts.iter().map(|h| h.name()).collect();
        f.debug_struct("Group")
            .field("hosts", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}
