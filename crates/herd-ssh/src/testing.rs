//! In-process SFTP server for tests
//!
//! Serves a local directory through `russh_sftp::server` over an in-memory
//! duplex stream. Paths from the client are used verbatim, so an
//! [`SftpFs`](crate::SftpFs) rooted at the directory's absolute path sees
//! the real files. Like OpenSSH, created files ignore the requested
//! attributes and `symlink` takes its arguments as (target, link). Every
//! request except the handshake is recorded.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::sync::{Arc, Mutex};

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use russh_sftp::server::Handler;

/// Requests seen by the server, as `op path` strings
pub(crate) type RequestLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct LocalDirServer {
    log: RequestLog,
    files: HashMap<String, fs::File>,
    dirs: HashMap<String, Option<Vec<File>>>,
    next_handle: u64,
}

fn status_of(err: io::Error) -> StatusCode {
    match err.kind() {
        io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn attrs_of(md: &fs::Metadata) -> FileAttributes {
    let mut attrs = FileAttributes::empty();
    attrs.size = Some(md.len());
    attrs.permissions = Some(md.mode());
    attrs.mtime = u32::try_from(md.mtime()).ok();
    attrs
}

impl LocalDirServer {
    fn record(&self, op: &str, path: &str) {
        self.log.lock().unwrap().push(format!("{} {}", op, path));
    }

    fn handle(&mut self) -> String {
        self.next_handle += 1;
        self.next_handle.to_string()
    }
}

impl Handler for LocalDirServer {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        self.record("open", &filename);
        let file = fs::OpenOptions::new()
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .append(pflags.contains(OpenFlags::APPEND))
            .create(pflags.contains(OpenFlags::CREATE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .open(&filename)
            .map_err(status_of)?;
        let handle = self.handle();
        self.files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.files.remove(&handle);
        self.dirs.remove(&handle);
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_of)?;
        let mut data = vec![0; len as usize];
        let n = file.read(&mut data).map_err(status_of)?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::Failure)?;
        file.seek(SeekFrom::Start(offset)).map_err(status_of)?;
        file.write_all(&data).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.record("stat", &path);
        let md = fs::metadata(&path).map_err(status_of)?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&md),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.record("lstat", &path);
        let md = fs::symlink_metadata(&path).map_err(status_of)?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&md),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let file = self.files.get(&handle).ok_or(StatusCode::Failure)?;
        let md = file.metadata().map_err(status_of)?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&md),
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.record("setstat", &path);
        if let Some(mode) = attrs.permissions {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(status_of)?;
        }
        if let Some(size) = attrs.size {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(status_of)?;
            file.set_len(size).map_err(status_of)?;
        }
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        self.record("opendir", &path);
        let mut files = Vec::new();
        for entry in fs::read_dir(&path).map_err(status_of)? {
            let entry = entry.map_err(status_of)?;
            let md = entry.metadata().map_err(status_of)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(File::new(name, attrs_of(&md)));
        }
        // listed in reverse so the client has to sort
        files.sort_by(|a, b| b.filename.cmp(&a.filename));
        files.push(File::dummy("."));
        let handle = self.handle();
        self.dirs.insert(handle.clone(), Some(files));
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        match self.dirs.get_mut(&handle) {
            Some(pending) => match pending.take() {
                Some(files) => Ok(Name { id, files }),
                None => Err(StatusCode::Eof),
            },
            None => Err(StatusCode::Failure),
        }
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.record("mkdir", &path);
        fs::create_dir(&path).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        self.record("rmdir", &path);
        fs::remove_dir(&path).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        self.record("remove", &filename);
        fs::remove_file(&filename).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        self.record("rename", &oldpath);
        fs::rename(&oldpath, &newpath).map_err(status_of)?;
        Ok(ok(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        Ok(Name {
            id,
            files: vec![File::dummy(path)],
        })
    }

    async fn symlink(
        &mut self,
        id: u32,
        first: String,
        second: String,
    ) -> Result<Status, Self::Error> {
        self.record("symlink", &format!("{} {}", first, second));
        std::os::unix::fs::symlink(&first, &second).map_err(status_of)?;
        Ok(ok(id))
    }
}

/// Start a server for `dir` and connect a client session to it
pub(crate) async fn serve(dir: &Path) -> (Arc<SftpSession>, RequestLog) {
    assert!(dir.is_absolute());
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let log = RequestLog::default();
    let server = LocalDirServer {
        log: Arc::clone(&log),
        ..Default::default()
    };
    tokio::spawn(russh_sftp::server::run(server_io, server));
    let session = SftpSession::new(client_io).await.unwrap();
    (Arc::new(session), log)
}
