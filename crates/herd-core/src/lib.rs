//! herd-core: Core abstractions for herd
//!
//! This crate provides the capability traits every transport implements
//! (hosts, filesystems, command runners), the host-relative path model,
//! per-host variables, configuration, and a transport backed by the local
//! machine.

pub mod config;
pub mod error;
pub mod fs;
pub mod local;
pub mod path;
pub mod traits;
pub mod vars;

pub use error::{
    BoxError, CloseError, CommandError, ConfigError, PathError, VarError, VfsError,
};
pub use path::{clean_path, Path, Perm};
pub use traits::{expand, CommandRunner, Completion, Host, Vfs};
pub use vars::{Var, VarStore};
