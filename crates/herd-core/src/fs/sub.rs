//! Sub-directory view of another filesystem

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::VfsError;
use crate::path::join_rel;
use crate::traits::{valid_path, DirEntry, Metadata, OpenFlags, Vfs, VfsFile};

/// A [`Vfs`] rooted at `dir` inside another `Vfs`.
///
/// Names are validated against the sub-tree before being forwarded, and
/// errors report the name the caller passed rather than the joined one.
#[derive(Clone)]
pub struct SubFs {
    fs: Arc<dyn Vfs>,
    dir: String,
}

impl SubFs {
    pub fn new(fs: Arc<dyn Vfs>, dir: &str) -> Result<Self, VfsError> {
        if !valid_path(dir) {
            return Err(VfsError::invalid("sub", dir));
        }
        Ok(Self {
            fs,
            dir: dir.to_string(),
        })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    fn full(&self, op: &'static str, name: &str) -> Result<String, VfsError> {
        if !valid_path(name) {
            return Err(VfsError::invalid(op, name));
        }
        Ok(join_rel(&self.dir, name))
    }
}

fn rename_err(name: &str) -> impl Fn(VfsError) -> VfsError + '_ {
    move |mut e| {
        e.path = name.to_string();
        e
    }
}

#[async_trait]
impl Vfs for SubFs {
    async fn open(&self, name: &str) -> Result<Box<dyn VfsFile>, VfsError> {
        let full = self.full("open", name)?;
        self.fs.open(&full).await.map_err(rename_err(name))
    }

    async fn stat(&self, name: &str) -> Result<Metadata, VfsError> {
        let full = self.full("stat", name)?;
        self.fs.stat(&full).await.map_err(rename_err(name))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError> {
        let full = self.full("readdir", name)?;
        self.fs.read_dir(&full).await.map_err(rename_err(name))
    }

    async fn open_file(
        &self,
        name: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn VfsFile>, VfsError> {
        let full = self.full("open", name)?;
        self.fs
            .open_file(&full, flags, mode)
            .await
            .map_err(rename_err(name))
    }

    async fn mkdir_all(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        let full = self.full("mkdir", name)?;
        self.fs.mkdir_all(&full, mode).await.map_err(rename_err(name))
    }

    async fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        let full = self.full("chmod", name)?;
        self.fs.chmod(&full, mode).await.map_err(rename_err(name))
    }

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError> {
        let full = self.full("chown", name)?;
        self.fs.chown(&full, uid, gid).await.map_err(rename_err(name))
    }

    async fn chtimes(
        &self,
        name: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), VfsError> {
        let full = self.full("chtimes", name)?;
        self.fs
            .chtimes(&full, atime, mtime)
            .await
            .map_err(rename_err(name))
    }

    async fn remove(&self, name: &str) -> Result<(), VfsError> {
        let full = self.full("remove", name)?;
        self.fs.remove(&full).await.map_err(rename_err(name))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let src = self.full("rename", from)?;
        let dst = self.full("rename", to)?;
        self.fs.rename(&src, &dst).await.map_err(rename_err(from))
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), VfsError> {
        let full = self.full("symlink", link)?;
        self.fs
            .symlink(target, &full)
            .await
            .map_err(rename_err(link))
    }

    async fn truncate(&self, name: &str, size: u64) -> Result<(), VfsError> {
        let full = self.full("truncate", name)?;
        self.fs.truncate(&full, size).await.map_err(rename_err(name))
    }
}
