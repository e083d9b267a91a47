//! Orchestration errors

use std::io;

use herd_core::error::{PathError, VfsError};
use thiserror::Error;

/// An action failed on one host.
///
/// Carries the host and task names so a handler can report where the
/// failure happened; the underlying error is kept as the source and can be
/// downcast.
#[derive(Error, Debug)]
#[error("({host}) {task}: {source:#}")]
pub struct TaskError {
    pub task: String,
    pub host: String,
    #[source]
    pub source: anyhow::Error,
}

/// Errors from copying files between two filesystems
#[derive(Error, Debug)]
pub enum CopyError {
    /// A source or destination path was invalid after expansion
    #[error(transparent)]
    Path(#[from] PathError),

    /// A filesystem operation failed
    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// Streaming file contents failed
    #[error("copy {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The run was cancelled between entries
    #[error("copy cancelled")]
    Cancelled,
}

impl CopyError {
    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}
