//! Process-level user facts

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Who is running herd and where their files live.
///
/// Detected once at startup and passed to whatever needs it, so tests can
/// substitute a fabricated home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEnv {
    pub username: String,
    pub home_dir: PathBuf,
    pub ssh_dir: PathBuf,
    /// Socket of a running ssh agent (`SSH_AUTH_SOCK`)
    pub auth_sock: Option<PathBuf>,
}

impl UserEnv {
    /// User with the given name and home directory, and no agent
    pub fn new(username: impl Into<String>, home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            username: username.into(),
            ssh_dir: home_dir.join(".ssh"),
            home_dir,
            auth_sock: None,
        }
    }

    /// Set the agent socket
    pub fn with_auth_sock(mut self, sock: impl Into<PathBuf>) -> Self {
        self.auth_sock = Some(sock.into());
        self
    }

    /// Read the current user, home directory and agent socket from the process
    pub fn detect() -> Result<Self, ConfigError> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| ConfigError::Environment("cannot determine home directory".into()))?;
        let mut env = Self::new(whoami::username(), home_dir);
        env.auth_sock = std::env::var_os("SSH_AUTH_SOCK")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        tracing::debug!(
            "Detected user {} (home {})",
            env.username,
            env.home_dir.display()
        );
        Ok(env)
    }

    /// Expand a leading `~` to the home directory
    pub fn expand_tilde(&self, path: &str) -> PathBuf {
        if path == "~" {
            return self.home_dir.clone();
        }
        match path.strip_prefix("~/") {
            Some(rest) => self.home_dir.join(rest),
            None => PathBuf::from(path),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home_dir
    }
}
