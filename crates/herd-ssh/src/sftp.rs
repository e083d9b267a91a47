//! Filesystem over an SFTP session

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use herd_core::error::VfsError;
use herd_core::traits::{valid_path, DirEntry, FileKind, Metadata, OpenFlags, Vfs, VfsFile};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, FileType, OpenFlags as SftpOpenFlags, StatusCode};

/// Remote filesystem rooted at a directory of an SFTP session.
///
/// The SFTP protocol does not apply the requested mode when it creates a
/// file, so [`Vfs::open_file`] and [`Vfs::mkdir_all`] set permissions
/// explicitly after creating.
#[derive(Clone)]
pub struct SftpFs {
    session: Arc<SftpSession>,
    root: String,
}

impl SftpFs {
    pub fn new(session: Arc<SftpSession>, root: impl Into<String>) -> Self {
        Self {
            session,
            root: root.into(),
        }
    }

    fn full(&self, op: &'static str, name: &str) -> Result<String, VfsError> {
        if !valid_path(name) {
            return Err(VfsError::invalid(op, name));
        }
        if name == "." {
            return Ok(self.root.clone());
        }
        Ok(format!("{}/{}", self.root.trim_end_matches('/'), name))
    }

    async fn set_attrs(
        &self,
        op: &'static str,
        name: &str,
        attrs: FileAttributes,
    ) -> Result<(), VfsError> {
        let path = self.full(op, name)?;
        self.session
            .set_metadata(path, attrs)
            .await
            .map_err(|e| VfsError::new(op, name, to_io(e)))
    }
}

fn to_io(err: SftpError) -> io::Error {
    let kind = match &err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
            StatusCode::OpUnsupported => io::ErrorKind::Unsupported,
            StatusCode::Eof => io::ErrorKind::UnexpectedEof,
            StatusCode::NoConnection | StatusCode::ConnectionLost => {
                io::ErrorKind::ConnectionAborted
            }
            _ => io::ErrorKind::Other,
        },
        SftpError::Timeout => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

fn kind_of(ft: FileType) -> FileKind {
    match ft {
        FileType::Dir => FileKind::Dir,
        FileType::File => FileKind::File,
        FileType::Symlink => FileKind::Symlink,
        _ => FileKind::Other,
    }
}

fn to_metadata(attrs: &FileAttributes) -> Metadata {
    Metadata {
        kind: kind_of(attrs.file_type()),
        len: attrs.size.unwrap_or(0),
        mode: attrs.permissions.unwrap_or(0) & 0o777,
        modified: attrs
            .mtime
            .map(|t| UNIX_EPOCH + Duration::from_secs(u64::from(t))),
    }
}

fn to_sftp_flags(flags: OpenFlags) -> SftpOpenFlags {
    let mut out = SftpOpenFlags::empty();
    if flags.read {
        out |= SftpOpenFlags::READ;
    }
    if flags.write {
        out |= SftpOpenFlags::WRITE;
    }
    if flags.append {
        out |= SftpOpenFlags::APPEND;
    }
    if flags.create {
        out |= SftpOpenFlags::CREATE;
    }
    if flags.truncate {
        out |= SftpOpenFlags::TRUNCATE;
    }
    if flags.exclusive {
        out |= SftpOpenFlags::EXCLUDE;
    }
    out
}

fn epoch_secs(t: SystemTime) -> u32 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn mode_attrs(mode: u32) -> FileAttributes {
    let mut attrs = FileAttributes::empty();
    attrs.permissions = Some(mode);
    attrs
}

#[async_trait]
impl Vfs for SftpFs {
    async fn open(&self, name: &str) -> Result<Box<dyn VfsFile>, VfsError> {
        self.open_file(name, OpenFlags::read_only(), 0).await
    }

    async fn stat(&self, name: &str) -> Result<Metadata, VfsError> {
        let path = self.full("stat", name)?;
        let attrs = self
            .session
            .metadata(path)
            .await
            .map_err(|e| VfsError::new("stat", name, to_io(e)))?;
        Ok(to_metadata(&attrs))
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>, VfsError> {
        let path = self.full("readdir", name)?;
        let dir = self
            .session
            .read_dir(path)
            .await
            .map_err(|e| VfsError::new("readdir", name, to_io(e)))?;
        let mut entries: Vec<DirEntry> = dir
            .filter(|entry| {
                let n = entry.file_name();
                n != "." && n != ".."
            })
            .map(|entry| DirEntry {
                name: entry.file_name(),
                kind: kind_of(entry.file_type()),
            })
            .collect();
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
        let existed = match self.session.metadata(path.clone()).await {
            Ok(attrs) if matches!(attrs.file_type(), FileType::Dir) => {
                return Err(VfsError::new(
                    "open",
                    name,
                    io::Error::from(io::ErrorKind::IsADirectory),
                ));
            }
            Ok(_) => true,
            Err(e) => {
                let e = to_io(e);
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(VfsError::new("open", name, e));
                }
                false
            }
        };

        let file = self
            .session
            .open_with_flags(path, to_sftp_flags(flags))
            .await
            .map_err(|e| VfsError::new("open", name, to_io(e)))?;

        if !existed && flags.create {
            self.set_attrs("chmod", name, mode_attrs(mode)).await?;
        }
        Ok(Box::new(file))
    }

    async fn mkdir_all(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        if !valid_path(name) {
            return Err(VfsError::invalid("mkdir", name));
        }
        if name == "." {
            return Ok(());
        }

        let mut partial = String::new();
        for elem in name.split('/') {
            if !partial.is_empty() {
                partial.push('/');
            }
            partial.push_str(elem);

            let path = self.full("mkdir", &partial)?;
            match self.session.metadata(path.clone()).await {
                Ok(attrs) if matches!(attrs.file_type(), FileType::Dir) => continue,
                Ok(_) => {
                    return Err(VfsError::new(
                        "mkdir",
                        name,
                        io::Error::from(io::ErrorKind::NotADirectory),
                    ));
                }
                Err(e) => {
                    let e = to_io(e);
                    if e.kind() != io::ErrorKind::NotFound {
                        return Err(VfsError::new("mkdir", name, e));
                    }
                }
            }
            self.session
                .create_dir(path)
                .await
                .map_err(|e| VfsError::new("mkdir", name, to_io(e)))?;
            self.set_attrs("chmod", &partial, mode_attrs(mode)).await?;
        }
        Ok(())
    }

    async fn chmod(&self, name: &str, mode: u32) -> Result<(), VfsError> {
        self.set_attrs("chmod", name, mode_attrs(mode)).await
    }

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), VfsError> {
        let mut attrs = FileAttributes::empty();
        attrs.uid = Some(uid);
        attrs.gid = Some(gid);
        self.set_attrs("chown", name, attrs).await
    }

    async fn chtimes(
        &self,
        name: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), VfsError> {
        let mut attrs = FileAttributes::empty();
        attrs.atime = Some(epoch_secs(atime));
        attrs.mtime = Some(epoch_secs(mtime));
        self.set_attrs("chtimes", name, attrs).await
    }

    async fn remove(&self, name: &str) -> Result<(), VfsError> {
        let path = self.full("remove", name)?;
        let err = |e| VfsError::new("remove", name, to_io(e));
        let attrs = self
            .session
            .symlink_metadata(path.clone())
            .await
            .map_err(err)?;
        if matches!(attrs.file_type(), FileType::Dir) {
            self.session.remove_dir(path).await.map_err(err)
        } else {
            self.session.remove_file(path).await.map_err(err)
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let src = self.full("rename", from)?;
        let dst = self.full("rename", to)?;
        self.session
            .rename(src, dst)
            .await
            .map_err(|e| VfsError::new("rename", from, to_io(e)))
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), VfsError> {
        let path = self.full("symlink", link)?;
        // OpenSSH's sftp-server takes (target, link), the reverse of the protocol draft
        self.session
            .symlink(target, path)
            .await
            .map_err(|e| VfsError::new("symlink", link, to_io(e)))
    }

    async fn truncate(&self, name: &str, size: u64) -> Result<(), VfsError> {
        let mut attrs = FileAttributes::empty();
        attrs.size = Some(size);
        self.set_attrs("truncate", name, attrs).await
    }
}
