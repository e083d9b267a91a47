//! Filesystem implementations
//!
//! [`LocalFs`] serves the local disk below a root directory; [`SubFs`]
//! narrows any other [`crate::Vfs`] to one of its sub-directories.

#[cfg(unix)]
mod local;
mod sub;

#[cfg(unix)]
pub use local::LocalFs;
pub use sub::SubFs;
