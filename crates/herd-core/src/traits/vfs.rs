//! Filesystem capability set
//!
//! Every transport exposes its filesystem through [`Vfs`]. Names passed to
//! a `Vfs` are slash-separated and relative to the filesystem's own root;
//! see [`valid_path`].

use async_trait::async_trait;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::VfsError;

/// An open file handle. Dropping it releases the handle; call
/// `AsyncWriteExt::shutdown` to release it and observe errors.
pub trait VfsFile: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> VfsFile for T where T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized {}

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Result of a stat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    pub len: u64,
    /// Permission bits (`0o777` mask)
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// One entry returned by [`Vfs::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

/// Flags for [`Vfs::open_file`], mirroring the conventional open(2) flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub exclusive: bool,
}

impl OpenFlags {
    /// Read-only access to an existing file
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Write access, creating the file if missing and truncating it otherwise
    pub fn write_create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }
}

/// Read/write filesystem rooted at some directory
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Open a file for reading
    async fn open(&self, name: &str) -> Result<Box<dyn VfsFile>, VfsError>;

    /// Stat a file, following symlinks
    async fn stat(&self, name: &str) -> Result<Metadata, VfsError>;

    /// List a directory, sorted by name
    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError>;

    /// Open a file with explicit flags. When the file is created it ends up
    /// with permission `mode`.
    async fn open_file(
        &self,
        name: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn VfsFile>, VfsError>;

    /// Create a directory and any missing parents
    async fn mkdir_all(&self, name: &str, mode: u32) -> Result<(), VfsError>;

    async fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError>;

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError>;

    async fn chtimes(
        &self,
        name: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), VfsError>;

    /// Remove a file or an empty directory
    async fn remove(&self, name: &str) -> Result<(), VfsError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError>;

    /// Create `link` pointing at `target`. The target is stored verbatim.
    async fn symlink(&self, target: &str, link: &str) -> Result<(), VfsError>;

    async fn truncate(&self, name: &str, size: u64) -> Result<(), VfsError>;
}

/// Whether `name` is a valid filesystem name.
///
/// Valid names are unrooted, slash-separated sequences of elements, none of
/// which are empty, `.` or `..`. The single name `.` refers to the root.
pub fn valid_path(name: &str) -> bool {
    if name == "." {
        return true;
    }
    !name.is_empty()
        && name
            .split('/')
            .all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_path() {
        for name in [".", "a", "a/b", "a/b/c.txt", "x..y", ".hidden"] {
            assert!(valid_path(name), "{} should be valid", name);
        }
        for name in ["", "/", "/a", "a/", "a//b", "./a", "a/.", "../a", "a/../b"] {
            assert!(!valid_path(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_open_flags_presets() {
        let w = OpenFlags::write_create_truncate();
        assert!(w.write && w.create && w.truncate);
        assert!(!w.read && !w.append && !w.exclusive);

        let r = OpenFlags::read_only();
        assert!(r.read);
        assert!(!r.write && !r.create);
    }
}
