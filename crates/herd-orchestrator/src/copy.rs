//! File transfer between the local machine and a host
//!
//! [`Upload`] pushes a local file or directory tree to every host;
//! [`Download`] fetches one from every host. Both expand their paths
//! against the host's environment first, then walk the source tree and
//! recreate it on the destination with the configured permissions.
//!
//! A download into a shared destination would let hosts overwrite each
//! other, so the host name is added to the destination: a directory lands
//! in `dest/<host>`, a file at `dest.<host>`. Copies are not transactional;
//! a failure leaves whatever was already copied in place.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use herd_core::fs::{LocalFs, SubFs};
use herd_core::path::{join_rel, Path, Perm};
use herd_core::traits::{Host, OpenFlags, Vfs};

use crate::action::Action;
use crate::error::CopyError;

/// Copy from the local machine to each host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub src: Path,
    pub dest: Path,
    pub perm: Perm,
}

/// Copy from each host to the local machine, tagging results with the
/// host name.
///
/// A directory source lands in `dest/<host>` and a file source at
/// `dest.<host>`. When `dest` names its prefix itself (relative part `.`),
/// `dest.<host>` would fall outside the prefix, so a file is written inside
/// it as `dest/<basename>.<host>` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub src: Path,
    pub dest: Path,
    pub perm: Perm,
}

impl Upload {
    pub fn new(src: Path, dest: Path, perm: Perm) -> Self {
        Self { src, dest, perm }
    }
}

impl Download {
    pub fn new(src: Path, dest: Path, perm: Perm) -> Self {
        Self { src, dest, perm }
    }
}

fn local_fs() -> Arc<dyn Vfs> {
    Arc::new(LocalFs::new("/"))
}

/// Root `fs` at the prefix of `path`, returning the view and the name of
/// `path` within it
fn rooted(fs: Arc<dyn Vfs>, path: &Path) -> Result<(SubFs, String), CopyError> {
    let sub = SubFs::new(fs, path.prefix_rel())?;
    Ok((sub, path.rel().to_string()))
}

#[async_trait]
impl Action for Upload {
    async fn apply(&self, cancel: CancellationToken, host: Arc<dyn Host>) -> anyhow::Result<()> {
        let src = self.src.expand(host.as_ref()).map_err(CopyError::from)?;
        let dest = self.dest.expand(host.as_ref()).map_err(CopyError::from)?;
        tracing::debug!(host = %host.name(), "Uploading {} to {}", src, dest);

        let (from, src_name) = rooted(local_fs(), &src)?;
        let (to, dest_name) = rooted(host.fs(), &dest)?;
        copy_tree(&from, src_name, &to, dest_name, self.perm, &cancel).await?;
        Ok(())
    }
}

#[async_trait]
impl Action for Download {
    async fn apply(&self, cancel: CancellationToken, host: Arc<dyn Host>) -> anyhow::Result<()> {
        let src = self.src.expand(host.as_ref()).map_err(CopyError::from)?;
        let dest = self.dest.expand(host.as_ref()).map_err(CopyError::from)?;

        let (from, src_name) = rooted(host.fs(), &src)?;
        let (to, dest_name) = rooted(local_fs(), &dest)?;
        let info = from.stat(&src_name).await.map_err(CopyError::from)?;
        let dest_name = tagged_dest(&dest_name, &src_name, host.name(), info.is_dir());
        tracing::debug!(host = %host.name(), "Downloading {} to {}/{}", src, dest.prefix(), dest_name);

        copy_tree(&from, src_name, &to, dest_name, self.perm, &cancel).await?;
        Ok(())
    }
}

/// Destination name for a download from `host`.
///
/// Directories get the host name as an extra path element, files get it as
/// a suffix. A file downloaded onto the destination root is named after the
/// source file.
fn tagged_dest(dest: &str, src: &str, host: &str, is_dir: bool) -> String {
    if is_dir {
        return join_rel(dest, host);
    }
    if dest == "." {
        let base = src.rsplit('/').next().unwrap_or(src);
        return format!("{}.{}", base, host);
    }
    format!("{}.{}", dest, host)
}

/// Copy `src` on `from` to `dest` on `to`, recursing into directories
fn copy_tree<'a>(
    from: &'a dyn Vfs,
    src: String,
    to: &'a dyn Vfs,
    dest: String,
    perm: Perm,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<(), CopyError>> {
    async move {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let info = from.stat(&src).await?;
        if !info.is_dir() {
            return copy_file(from, &src, to, &dest, perm.file_perm()).await;
        }

        to.mkdir_all(&dest, perm.dir_perm()).await?;
        for entry in from.read_dir(&src).await? {
            copy_tree(
                from,
                join_rel(&src, &entry.name),
                to,
                join_rel(&dest, &entry.name),
                perm,
                cancel,
            )
            .await?;
        }
        Ok(())
    }
    .boxed()
}

async fn copy_file(
    from: &dyn Vfs,
    src: &str,
    to: &dyn Vfs,
    dest: &str,
    mode: u32,
) -> Result<(), CopyError> {
    let mut reader = from.open(src).await?;
    let mut writer = match to
        .open_file(dest, OpenFlags::write_create_truncate(), mode)
        .await
    {
        Ok(writer) => writer,
        Err(e) => {
            let _ = reader.shutdown().await;
            return Err(e.into());
        }
    };

    let copied = tokio::io::copy(&mut reader, &mut writer).await;
    let closed_dest = writer.shutdown().await;
    let closed_src = reader.shutdown().await;

    copied.map_err(|e| CopyError::io(src, e))?;
    closed_dest.map_err(|e| CopyError::io(dest, e))?;
    closed_src.map_err(|e| CopyError::io(src, e))?;
    Ok(())
}
