//! Local command runner using `sh -c`

use async_trait::async_trait;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::CommandError;
use crate::traits::{BoxReader, BoxWriter, CommandRunner, Completion};

/// In-memory buffer between a pipe handed to the caller and the child
const PIPE_BUFFER: usize = 64 * 1024;

enum State {
    Idle,
    Running(JoinHandle<Result<Completion, CommandError>>),
    Done,
}

/// Runs one command through the local shell
pub struct LocalCommand {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    state: State,
    // kills the child if the runner is dropped mid-run
    cancel_guard: Option<DropGuard>,
}

impl LocalCommand {
    pub fn new() -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            state: State::Idle,
            cancel_guard: None,
        }
    }

    fn check_idle(&self) -> Result<(), CommandError> {
        match self.state {
            State::Idle => Ok(()),
            _ => Err(CommandError::AlreadyStarted),
        }
    }
}

impl Default for LocalCommand {
    fn default() -> Self {
        Self::new()
    }
}

fn piped_if(wanted: bool) -> Stdio {
    if wanted {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

async fn pump<R, W>(mut from: R, mut to: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // the reader may go away early; the child then sees a broken pipe
    let _ = tokio::io::copy(&mut from, &mut to).await;
    let _ = to.shutdown().await;
}

async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    stdin_task: Option<JoinHandle<()>>,
    output_tasks: Vec<JoinHandle<()>>,
) -> Result<Completion, CommandError> {
    let mut forced = false;
    let status = tokio::select! {
        biased;
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            forced = true;
            tracing::debug!("Cancelling local command (pid {:?})", child.id());
            let _ = child.start_kill();
            child.wait().await
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    // a background child may hold stdout or stderr open after the shell exits
    let aborts: Vec<_> = output_tasks.iter().map(|t| t.abort_handle()).collect();
    if forced {
        aborts.iter().for_each(|t| t.abort());
    }
    tokio::select! {
        biased;
        _ = async {
            for task in output_tasks {
                let _ = task.await;
            }
        } => {}
        _ = cancel.cancelled() => {
            forced = true;
            tracing::debug!("Cancelled while draining local command output");
            aborts.iter().for_each(|t| t.abort());
        }
    }

    let status = status?;
    Ok(Completion {
        exit_status: status.code().map(|c| c as u32),
        signal: status.signal().map(|s| s.to_string()),
        forced,
    })
}

#[async_trait]
impl CommandRunner for LocalCommand {
    fn stdin_pipe(&mut self) -> Result<BoxWriter, CommandError> {
        self.check_idle()?;
        if self.stdin.is_some() {
            return Err(CommandError::PipeTaken("stdin"));
        }
        let (ours, theirs) = duplex(PIPE_BUFFER);
        self.stdin = Some(ours);
        Ok(Box::new(theirs))
    }

    fn stdout_pipe(&mut self) -> Result<BoxReader, CommandError> {
        self.check_idle()?;
        if self.stdout.is_some() {
            return Err(CommandError::PipeTaken("stdout"));
        }
        let (ours, theirs) = duplex(PIPE_BUFFER);
        self.stdout = Some(ours);
        Ok(Box::new(theirs))
    }

    fn stderr_pipe(&mut self) -> Result<BoxReader, CommandError> {
        self.check_idle()?;
        if self.stderr.is_some() {
            return Err(CommandError::PipeTaken("stderr"));
        }
        let (ours, theirs) = duplex(PIPE_BUFFER);
        self.stderr = Some(ours);
        Ok(Box::new(theirs))
    }

    async fn start_with_cancel(
        &mut self,
        cmd: &str,
        cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.check_idle()?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(piped_if(self.stdin.is_some()))
            .stdout(piped_if(self.stdout.is_some()))
            .stderr(piped_if(self.stderr.is_some()))
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!("Started local command: {}", cmd);

        let stdin_task = match (self.stdin.take(), child.stdin.take()) {
            (Some(src), Some(dst)) => Some(tokio::spawn(pump(src, dst))),
            _ => None,
        };
        let mut output_tasks = Vec::new();
        if let (Some(sink), Some(out)) = (self.stdout.take(), child.stdout.take()) {
            output_tasks.push(tokio::spawn(pump(out, sink)));
        }
        if let (Some(sink), Some(err)) = (self.stderr.take(), child.stderr.take()) {
            output_tasks.push(tokio::spawn(pump(err, sink)));
        }

        let cancel = cancel.child_token();
        self.cancel_guard = Some(cancel.clone().drop_guard());
        self.state = State::Running(tokio::spawn(supervise(
            child,
            cancel,
            stdin_task,
            output_tasks,
        )));
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), CommandError> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Running(handle) => {
                let completion = handle.await.map_err(CommandError::transport)??;
                completion.into_result()
            }
            State::Idle => {
                self.state = State::Idle;
                Err(CommandError::NotStarted)
            }
            State::Done => Err(CommandError::NotStarted),
        }
    }
}
