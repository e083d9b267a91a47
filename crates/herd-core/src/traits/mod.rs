//! Core trait definitions

mod command;
mod host;
mod vfs;

pub use command::{BoxReader, BoxWriter, CommandRunner, Completion};
pub use host::{expand, Host};
pub use vfs::{valid_path, DirEntry, FileKind, Metadata, OpenFlags, Vfs, VfsFile};
