//! Host trait

use async_trait::async_trait;
use std::sync::Arc;

use super::{CommandRunner, Vfs};
use crate::error::{CloseError, CommandError};
use crate::path::expand_env;
use crate::vars::{Var, VarStore};

/// One connected machine.
///
/// Any transport that can run commands, expose a filesystem and report its
/// environment can implement `Host` and be driven by the orchestrator and
/// the copy engine unchanged.
#[async_trait]
pub trait Host: Send + Sync {
    /// Name of the host, unique within a group
    fn name(&self) -> &str;

    /// Network address the host was reached at
    fn address(&self) -> &str;

    /// Look up a variable in the environment captured at connect time
    fn env(&self, key: &str) -> Option<&str>;

    /// Filesystem rooted at the host's `/`
    fn fs(&self) -> Arc<dyn Vfs>;

    /// Open a new command session
    async fn new_command(&self) -> Result<Box<dyn CommandRunner>, CommandError>;

    /// Release the connection. Every underlying release is attempted; later
    /// calls are no-ops.
    async fn close(&self) -> Result<(), CloseError>;

    /// Per-host variables shared between actions of a run
    fn vars(&self) -> &VarStore;

    fn set_var(&self, key: &str, value: Var) {
        self.vars().set(key, value);
    }

    fn var(&self, key: &str) -> Option<Var> {
        self.vars().get(key)
    }
}

/// Substitute `$VAR` and `${VAR}` in `s` from the host's environment
pub fn expand(host: &dyn Host, s: &str) -> String {
    expand_env(s, |key| host.env(key).map(str::to_string))
}
