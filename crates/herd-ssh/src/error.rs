//! SSH transport errors

use herd_core::error::{CommandError, ConfigError};
use thiserror::Error;

/// Errors raised while establishing a connection to a host.
///
/// A connection either reaches a usable state or fails with one of these;
/// anything opened along the way is torn down first.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Resolving the host's configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// SSH protocol or transport failure
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Key handling failure (known hosts, agent)
    #[error("Key error: {0}")]
    Key(#[from] russh_keys::Error),

    /// SFTP subsystem failure
    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    /// Dial did not complete in time
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// The server rejected every signer
    #[error("Authentication rejected for {user}@{host}")]
    AuthRejected { user: String, host: String },

    /// The server's host key does not match the recorded one
    #[error("Host key verification failed for {host}: {message}")]
    HostKeyRejected { host: String, message: String },

    /// Capturing the remote environment failed
    #[error("Failed to capture environment on {host}: {source}")]
    Environment {
        host: String,
        #[source]
        source: CommandError,
    },
}
