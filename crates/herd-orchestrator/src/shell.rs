//! Shell commands as actions

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use herd_core::error::CommandError;
use herd_core::traits::{BoxReader, BoxWriter, Host};
use herd_core::vars::Var;

use crate::action::Action;

/// Writer shared by every host of a run; output is written a line at a time
pub type OutputSink = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wrap `writer` so several hosts can stream into it
pub fn sink(writer: impl AsyncWrite + Send + Unpin + 'static) -> OutputSink {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Run one command on every host.
///
/// Output is relayed line by line while the command runs: each line is
/// logged with the host name (stdout at `info`, stderr at `warn`) and
/// copied to the optional sinks. Optional stdin bytes are fed to every
/// host, and the trimmed stdout can be kept in a host variable for later
/// actions.
#[derive(Clone)]
pub struct Shell {
    pub cmd: String,
    pub stdin: Option<Bytes>,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
    pub store_as: Option<String>,
}

impl Shell {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            stdin: None,
            stdout: None,
            stderr: None,
            store_as: None,
        }
    }

    /// Feed `input` to the command's stdin
    pub fn with_stdin(mut self, input: impl Into<Bytes>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Store the trimmed stdout in the host variable `key`
    pub fn store_output(mut self, key: impl Into<String>) -> Self {
        self.store_as = Some(key.into());
        self
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("cmd", &self.cmd)
            .field("stdin", &self.stdin.as_ref().map(Bytes::len))
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("store_as", &self.store_as)
            .finish()
    }
}

async fn feed(pipe: Option<BoxWriter>, input: Option<&Bytes>) -> io::Result<()> {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return Ok(());
    };
    match pipe.write_all(input).await {
        // the command exited without reading all of its input
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        other => other?,
    }
    pipe.shutdown().await
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Log, forward and optionally keep every line of `pipe` until it closes.
///
/// A failing sink is dropped for the rest of the stream but the pipe is
/// still drained; the sink error is returned at the end.
async fn relay(
    pipe: BoxReader,
    host: &str,
    stream: Stream,
    sink: Option<&OutputSink>,
    mut keep: Option<&mut Vec<u8>>,
) -> io::Result<()> {
    let mut reader = BufReader::new(pipe);
    let mut sink = sink;
    let mut sink_err = None;
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        match stream {
            Stream::Stdout => tracing::info!(host = %host, "{}", text),
            Stream::Stderr => tracing::warn!(host = %host, "{}", text),
        }
        if let Some(out) = sink {
            if let Err(e) = out.lock().await.write_all(&line).await {
                sink_err = Some(e);
                sink = None;
            }
        }
        if let Some(buf) = keep.as_mut() {
            buf.extend_from_slice(&line);
        }
    }

    if let Some(out) = sink {
        out.lock().await.flush().await?;
    }
    sink_err.map_or(Ok(()), Err)
}

#[async_trait]
impl Action for Shell {
    async fn apply(&self, cancel: CancellationToken, host: Arc<dyn Host>) -> anyhow::Result<()> {
        let mut runner = host.new_command().await?;
        let stdin = match self.stdin {
            Some(_) => Some(runner.stdin_pipe()?),
            None => None,
        };
        let stdout = runner.stdout_pipe()?;
        let stderr = runner.stderr_pipe()?;

        runner.start_with_cancel(&self.cmd, cancel).await?;
        let mut captured = self.store_as.as_ref().map(|_| Vec::new());
        let (fed, out, err) = tokio::join!(
            feed(stdin, self.stdin.as_ref()),
            relay(
                stdout,
                host.name(),
                Stream::Stdout,
                self.stdout.as_ref(),
                captured.as_mut()
            ),
            relay(stderr, host.name(), Stream::Stderr, self.stderr.as_ref(), None)
        );
        runner.wait().await?;
        out?;
        err?;
        fed?;

        if let (Some(key), Some(buf)) = (&self.store_as, captured) {
            let value = String::from_utf8_lossy(&buf).trim().to_string();
            host.set_var(key, Var::Str(value));
        }
        Ok(())
    }
}

/// Run `cmd` on `host` and return its stdout.
///
/// Fails if the command cannot be started, exits non-zero, or is cancelled.
pub async fn execute(
    host: &dyn Host,
    cancel: &CancellationToken,
    cmd: &str,
) -> Result<String, CommandError> {
    let mut runner = host.new_command().await?;
    let out = runner.output_with_cancel(cancel, cmd).await?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
