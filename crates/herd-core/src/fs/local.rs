//! Local disk filesystem

use async_trait::async_trait;
use std::fs::{FileTimes, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path as StdPath, PathBuf};
use std::time::SystemTime;
use tokio::fs;

use crate::error::VfsError;
use crate::traits::{valid_path, DirEntry, FileKind, Metadata, OpenFlags, Vfs, VfsFile};

/// Filesystem over the local disk, rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &StdPath {
        &self.root
    }

    fn full(&self, op: &'static str, name: &str) -> Result<PathBuf, VfsError> {
        if !valid_path(name) {
            return Err(VfsError::invalid(op, name));
        }
        if name == "." {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(name))
        }
    }
}

fn kind_of(ft: std::fs::FileType) -> FileKind {
    if ft.is_dir() {
        FileKind::Dir
    } else if ft.is_file() {
        FileKind::File
    } else if ft.is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::Other
    }
}

fn to_metadata(md: &std::fs::Metadata) -> Metadata {
    Metadata {
        kind: kind_of(md.file_type()),
        len: md.len(),
        mode: md.permissions().mode() & 0o777,
        modified: md.modified().ok(),
    }
}

async fn blocking<F>(f: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(io::Error::other)?
}

#[async_trait]
impl Vfs for LocalFs {
    async fn open(&self, name: &str) -> Result<Box<dyn VfsFile>, VfsError> {
        let path = self.full("open", name)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| VfsError::new("open", name, e))?;
        Ok(Box::new(file))
    }

    async fn stat(&self, name: &str) -> Result<Metadata, VfsError> {
        let path = self.full("stat", name)?;
        let md = fs::metadata(&path)
            .await
            .map_err(|e| VfsError::new("stat", name, e))?;
        Ok(to_metadata(&md))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError> {
        let path = self.full("readdir", name)?;
        let err = |e| VfsError::new("readdir", name, e);
        let mut dir = fs::read_dir(&path).await.map_err(err)?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(err)? {
            let ft = entry.file_type().await.map_err(err)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: kind_of(ft),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open_file(
        &self,
        name: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Box<dyn VfsFile>, VfsError> {
        let path = self.full("open", name)?;
        let existed = match fs::metadata(&path).await {
            Ok(md) if md.is_dir() => {
                return Err(VfsError::new(
                    "open",
                    name,
                    io::Error::from(io::ErrorKind::IsADirectory),
                ));
            }
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(VfsError::new("open", name, e)),
        };

        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .create(flags.create && !flags.exclusive)
            .create_new(flags.create && flags.exclusive)
            .truncate(flags.truncate)
            .mode(mode)
            .open(&path)
            .await
            .map_err(|e| VfsError::new("open", name, e))?;

        // the creation mode is filtered by the umask
        if !existed && flags.create {
            fs::set_permissions(&path, Permissions::from_mode(mode))
                .await
                .map_err(|e| VfsError::new("chmod", name, e))?;
        }
        Ok(Box::new(file))
    }

    async fn mkdir_all(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        let path = self.full("mkdir", name)?;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(&path)
            .await
            .map_err(|e| VfsError::new("mkdir", name, e))
    }

    async fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        let path = self.full("chmod", name)?;
        fs::set_permissions(&path, Permissions::from_mode(mode))
            .await
            .map_err(|e| VfsError::new("chmod", name, e))
    }

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError> {
        let path = self.full("chown", name)?;
        blocking(move || std::os::unix::fs::chown(path, Some(uid), Some(gid)))
            .await
            .map_err(|e| VfsError::new("chown", name, e))
    }

    async fn chtimes(
        &self,
        name: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), VfsError> {
        let path = self.full("chtimes", name)?;
        blocking(move || {
            let times = FileTimes::new().set_accessed(atime).set_modified(mtime);
            std::fs::File::open(path)?.set_times(times)
        })
        .await
        .map_err(|e| VfsError::new("chtimes", name, e))
    }

    async fn remove(&self, name: &str) -> Result<(), VfsError> {
        let path = self.full("remove", name)?;
        let err = |e| VfsError::new("remove", name, e);
        let md = fs::symlink_metadata(&path).await.map_err(err)?;
        if md.is_dir() {
            fs::remove_dir(&path).await.map_err(err)
        } else {
            fs::remove_file(&path).await.map_err(err)
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let src = self.full("rename", from)?;
        let dst = self.full("rename", to)?;
        fs::rename(&src, &dst)
            .await
            .map_err(|e| VfsError::new("rename", from, e))
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), VfsError> {
        let path = self.full("symlink", link)?;
        fs::symlink(target, &path)
            .await
            .map_err(|e| VfsError::new("symlink", link, e))
    }

    async fn truncate(&self, name: &str, size: u64) -> Result<(), VfsError> {
        let path = self.full("truncate", name)?;
        let err = |e| VfsError::new("truncate", name, e);
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(err)?;
        file.set_len(size).await.map_err(err)
    }
}
