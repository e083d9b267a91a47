//! Host backed by the local machine

#[cfg(unix)]
mod command;
#[cfg(unix)]
mod host;

#[cfg(unix)]
pub use command::LocalCommand;
#[cfg(unix)]
pub use host::LocalHost;
