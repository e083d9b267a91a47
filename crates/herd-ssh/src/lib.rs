//! herd-ssh: SSH transport for herd
//!
//! Resolves host aliases through OpenSSH client configuration, connects
//! with russh, and exposes each connection as a [`herd_core::Host`] whose
//! filesystem is an SFTP session and whose commands run on session
//! channels.

mod client;
pub mod command;
pub mod error;
pub mod group;
pub mod host;
pub mod resolver;
pub mod sftp;
pub mod ssh_config;
#[cfg(all(test, unix))]
mod testing;

pub use command::SshCommand;
pub use error::ConnectionError;
pub use group::connect_group;
pub use host::SshHost;
pub use resolver::{connect_addr, HostKeyPolicy, ResolvedConfig, Resolver, Signer};
pub use sftp::SftpFs;
pub use ssh_config::{config_source, ConfigLookup, SshConfig};
