//! Local host

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::LocalCommand;
use crate::error::{CloseError, CommandError};
use crate::fs::LocalFs;
use crate::traits::{CommandRunner, Host, Vfs};
use crate::vars::VarStore;

/// A [`Host`] that runs commands and file operations on this machine.
///
/// The environment is snapshotted when the host is created, matching the
/// connect-time snapshot taken by remote transports.
pub struct LocalHost {
    name: String,
    env: HashMap<String, String>,
    fs: Arc<LocalFs>,
    vars: VarStore,
    closed: AtomicBool,
}

impl LocalHost {
    /// Create a local host named `name` with the current process environment
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_env(name, std::env::vars().collect())
    }

    /// Create a local host with an explicit environment
    pub fn with_env(name: impl Into<String>, env: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            env,
            fs: Arc::new(LocalFs::new("/")),
            vars: VarStore::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Host for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        "localhost"
    }

    fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    fn fs(&self) -> Arc<dyn Vfs> {
        self.fs.clone()
    }

    async fn new_command(&self) -> Result<Box<dyn CommandRunner>, CommandError> {
        Ok(Box::new(LocalCommand::new()))
    }

    async fn close(&self) -> Result<(), CloseError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(host = %self.name, "closed local host");
        }
        Ok(())
    }

    fn vars(&self) -> &VarStore {
        &self.vars
    }
}
