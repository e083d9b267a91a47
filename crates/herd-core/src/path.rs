//! Host-relative paths and permission sets
//!
//! A [`Path`] is a relative path plus the absolute prefix it is relative to.
//! Prefixes may reference host environment variables (`$HOME`); these are
//! substituted once, per host, by [`Path::expand`] before any I/O happens.

use std::fmt;

use crate::error::PathError;
use crate::traits::Host;

/// Default mode for files when no permission is given
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default mode for directories when no permission is given
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// A path relative to a prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    prefix: String,
    path: String,
}

impl Path {
    /// Create a path relative to `prefix`.
    ///
    /// `prefix` must be absolute, or start with an environment reference
    /// (`$HOME`) that becomes absolute once expanded. `path` must be relative
    /// and may not climb above the prefix.
    pub fn new(prefix: &str, path: &str) -> Result<Self, PathError> {
        if !is_abs(prefix) && !prefix.starts_with('$') {
            return Err(PathError::NotAbsolute(prefix.to_string()));
        }
        if is_abs(path) {
            return Err(PathError::NotRelative(path.to_string()));
        }
        let path_clean = clean_path(path);
        if path_clean == ".." || path_clean.starts_with("../") {
            return Err(PathError::EscapesRoot(path.to_string()));
        }
        Ok(Self {
            prefix: clean_path(prefix),
            path: path_clean,
        })
    }

    /// Create a path from an absolute path, using `/` as the prefix
    pub fn from_abs(path: &str) -> Result<Self, PathError> {
        if !is_abs(path) {
            return Err(PathError::NotAbsolute(path.to_string()));
        }
        let cleaned = clean_path(path);
        let rel = cleaned.trim_start_matches('/');
        Ok(Self {
            prefix: "/".to_string(),
            path: if rel.is_empty() {
                ".".to_string()
            } else {
                rel.to_string()
            },
        })
    }

    /// Substitute `$VAR` references using the host's captured environment.
    ///
    /// The result is re-validated: the expanded prefix must be absolute and
    /// the expanded path must stay relative to it.
    pub fn expand(&self, host: &dyn Host) -> Result<Self, PathError> {
        let prefix = crate::traits::expand(host, &self.prefix);
        let path = crate::traits::expand(host, &self.path);
        if !is_abs(&prefix) {
            return Err(PathError::NotAbsolute(prefix));
        }
        Self::new(&prefix, &path)
    }

    /// Absolute prefix the path is relative to
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Relative part, `.` when the path names the prefix itself
    pub fn rel(&self) -> &str {
        &self.path
    }

    /// Prefix without its leading separator, for use against a filesystem rooted at `/`
    pub fn prefix_rel(&self) -> &str {
        let trimmed = self.prefix.trim_start_matches('/');
        if trimmed.is_empty() {
            "."
        } else {
            trimmed
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path == "." {
            f.write_str(&self.prefix)
        } else if self.prefix.ends_with('/') {
            write!(f, "{}{}", self.prefix, self.path)
        } else {
            write!(f, "{}/{}", self.prefix, self.path)
        }
    }
}

fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// Lexically clean a slash-separated path.
///
/// Collapses repeated separators, removes `.` elements and resolves `..`
/// against preceding elements. Rooted paths never climb above `/`. An empty
/// result becomes `.`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join two slash-separated relative paths, treating `.` as empty
pub fn join_rel(base: &str, name: &str) -> String {
    match (base, name) {
        (".", n) => n.to_string(),
        (b, ".") => b.to_string(),
        (b, n) => format!("{}/{}", b.trim_end_matches('/'), n),
    }
}

/// Replace `$VAR` and `${VAR}` in `s` using `lookup`; unknown variables become empty
pub fn expand_env(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some((start, '{')) => {
                chars.next();
                let rest = &s[start + 1..];
                match rest.find('}') {
                    Some(end) => {
                        let name = &rest[..end];
                        out.push_str(&lookup(name).unwrap_or_default());
                        // skip the name and the closing brace
                        for _ in 0..name.chars().count() + 1 {
                            chars.next();
                        }
                    }
                    None => out.push_str(&s[i..start + 1]),
                }
            }
            Some((start, c)) if c == '_' || c.is_ascii_alphanumeric() => {
                let mut end = start;
                while let Some((j, c)) = chars.peek().copied() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&s[start..end]).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Permissions used when creating files and directories.
///
/// If only a file mode is given, directories use it too. With no modes
/// set, files get 0644 and directories 0755.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Perm {
    file: Option<u32>,
    dir: Option<u32>,
}

impl Perm {
    /// Permission with the given file mode (also used for directories)
    pub fn new(mode: u32) -> Self {
        Self {
            file: Some(mode),
            dir: None,
        }
    }

    /// Set a distinct directory mode
    pub fn with_dir_perm(mut self, mode: u32) -> Self {
        self.dir = Some(mode);
        self
    }

    /// Mode for created files
    pub fn file_perm(&self) -> u32 {
        self.file.unwrap_or(DEFAULT_FILE_MODE)
    }

    /// Mode for created directories
    pub fn dir_perm(&self) -> u32 {
        self.dir.or(self.file).unwrap_or(DEFAULT_DIR_MODE)
    }
}
