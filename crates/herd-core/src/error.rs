//! Core error types for herd

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used where a failure may come from any transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// No configuration source could be resolved
    #[error("No configuration source: {0}")]
    NoSource(String),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config file or its directory could not be written
    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed line in a line-oriented config file
    #[error("{path}:{line}: {message}")]
    Syntax {
        path: String,
        line: usize,
        message: String,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No usable authentication signers for a host alias
    #[error("No usable authentication signers for host '{0}'")]
    NoSigners(String),

    /// Platform lookup failed (user name, home directory)
    #[error("Environment lookup failed: {0}")]
    Environment(String),
}

/// Errors produced when constructing or expanding a [`crate::Path`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path was relative but an absolute path was required
    #[error("'{0}': not an absolute path")]
    NotAbsolute(String),

    /// Path was absolute but a relative path was required
    #[error("'{0}': not a relative path")]
    NotRelative(String),

    /// Path climbs above the root it is relative to
    #[error("'{0}': path escapes its root")]
    EscapesRoot(String),
}

/// A failed filesystem operation, carrying the operation name and path
#[derive(Error, Debug)]
#[error("{op} {path}: {source}")]
pub struct VfsError {
    /// Operation that failed (`open`, `stat`, `mkdir`, ...)
    pub op: &'static str,
    /// Path as given by the caller, relative to the filesystem root
    pub path: String,
    /// Underlying cause
    #[source]
    pub source: io::Error,
}

impl VfsError {
    /// Create a new error for `op` on `path`
    pub fn new(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }

    /// Reject a path that is not valid for a rooted filesystem
    pub fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        let source = io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path '{}'", path),
        );
        Self { op, path, source }
    }

    /// Kind of the underlying I/O error
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Whether the target did not exist
    pub fn is_not_found(&self) -> bool {
        self.kind() == io::ErrorKind::NotFound
    }

    /// Whether the path was rejected before any I/O
    pub fn is_invalid_path(&self) -> bool {
        self.kind() == io::ErrorKind::InvalidInput
    }
}

/// Errors from running a command on a host
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command ran and exited with a non-zero status
    #[error("command exited with status {0}")]
    Exit(u32),

    /// The command was terminated by a signal
    #[error("command terminated by signal {0}")]
    Signal(String),

    /// The session closed without reporting an exit status
    #[error("session closed without exit status")]
    MissingStatus,

    /// The run was cancelled before the command completed
    #[error("command cancelled")]
    Cancelled,

    /// `start` was called twice, or a pipe was requested after start
    #[error("command already started")]
    AlreadyStarted,

    /// `wait` was called before `start`
    #[error("command not started")]
    NotStarted,

    /// The pipe was already taken
    #[error("{0} pipe already taken")]
    PipeTaken(&'static str),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// I/O error on the local side
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CommandError {
    /// Wrap a transport-specific error
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

/// Errors from typed access to per-host variables
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VarError {
    /// The variable holds a value of a different type
    #[error("variable '{key}' holds {actual}, not {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// One resource that failed to release
#[derive(Error, Debug)]
#[error("{resource}: {source}")]
pub struct CloseFailure {
    /// What was being closed (host name, session, ...)
    pub resource: String,
    /// Why it failed
    #[source]
    pub source: BoxError,
}

/// Aggregate of every release that failed; no release is skipped
#[derive(Error, Debug, Default)]
pub struct CloseError {
    pub failures: Vec<CloseFailure>,
}

impl CloseError {
    /// Record a failure
    pub fn push(&mut self, resource: impl Into<String>, source: impl Into<BoxError>) {
        self.failures.push(CloseFailure {
            resource: resource.into(),
            source: source.into(),
        });
    }

    /// Fold another aggregate into this one, prefixing its resources
    pub fn absorb(&mut self, prefix: &str, other: CloseError) {
        for failure in other.failures {
            self.failures.push(CloseFailure {
                resource: format!("{}/{}", prefix, failure.resource),
                source: failure.source,
            });
        }
    }

    /// `Ok` when nothing failed
    pub fn into_result(self) -> Result<(), CloseError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}
