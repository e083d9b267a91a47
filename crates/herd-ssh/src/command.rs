//! Remote command runner over an SSH session channel

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use herd_core::error::CommandError;
use herd_core::traits::{BoxReader, BoxWriter, CommandRunner, Completion};

/// In-memory buffer between a pipe handed to the caller and the channel
const PIPE_BUFFER: usize = 64 * 1024;

/// Largest stdin chunk sent in one data message
const STDIN_CHUNK: usize = 32 * 1024;

/// stderr on an SSH session channel
const EXTENDED_STDERR: u32 = 1;

enum State {
    Idle,
    Running(JoinHandle<Result<Completion, CommandError>>),
    Done,
}

/// One `exec` request on a dedicated session channel
pub struct SshCommand {
    channel: Option<Channel<Msg>>,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    state: State,
    // closes the channel if the runner is dropped mid-run
    cancel_guard: Option<DropGuard>,
}

impl SshCommand {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel: Some(channel),
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

async fn read_some(stdin: &mut Option<DuplexStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stdin {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Write to a sink; a sink whose reader went away is dropped and further
/// output discarded
async fn forward(sink: &mut Option<DuplexStream>, data: &[u8]) {
    if let Some(writer) = sink {
        if writer.write_all(data).await.is_err() {
            *sink = None;
        }
    }
}

async fn drive(
    mut channel: Channel<Msg>,
    mut stdin: Option<DuplexStream>,
    mut stdout: Option<DuplexStream>,
    mut stderr: Option<DuplexStream>,
    cancel: CancellationToken,
) -> Result<Completion, CommandError> {
    let mut completion = Completion::default();
    let mut failure = None;
    let mut buf = vec![0u8; STDIN_CHUNK];

    if stdin.is_none() {
        channel.eof().await.map_err(CommandError::transport)?;
    }

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => forward(&mut stdout, &data).await,
                Some(ChannelMsg::ExtendedData { data, ext: EXTENDED_STDERR }) => {
                    forward(&mut stderr, &data).await
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    completion.exit_status = Some(exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    completion.signal = Some(format!("{:?}", signal_name));
                }
                Some(ChannelMsg::Failure) => {
                    failure = Some(CommandError::transport("exec request rejected by server"));
                    let _ = channel.close().await;
                    break;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            read = read_some(&mut stdin, &mut buf) => match read {
                Ok(0) | Err(_) => {
                    stdin = None;
                    if let Err(e) = channel.eof().await {
                        failure = Some(CommandError::transport(e));
                        break;
                    }
                }
                Ok(n) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        failure = Some(CommandError::transport(e));
                        break;
                    }
                }
            },
            _ = cancel.cancelled(), if !completion.forced => {
                completion.forced = true;
                tracing::debug!("Closing cancelled ssh session");
                let _ = channel.close().await;
            }
        }
    }

    for sink in [stdout.as_mut(), stderr.as_mut()].into_iter().flatten() {
        let _ = sink.shutdown().await;
    }

    match failure {
        // a closed channel after cancellation is the expected outcome
        Some(_) if completion.forced => Ok(completion),
        Some(err) => Err(err),
        None => Ok(completion),
    }
}

#[async_trait]
impl CommandRunner for SshCommand {
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
        let channel = self.channel.take().ok_or(CommandError::AlreadyStarted)?;
        channel
            .exec(true, cmd)
            .await
            .map_err(CommandError::transport)?;
        tracing::debug!("Started remote command: {}", cmd);

        let cancel = cancel.child_token();
        self.cancel_guard = Some(cancel.clone().drop_guard());
        self.state = State::Running(tokio::spawn(drive(
            channel,
            self.stdin.take(),
            self.stdout.take(),
            self.stderr.take(),
            cancel,
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
