//! Command runner trait

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;

/// Readable end of a command's output pipe
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a command's input pipe
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How a command session ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Exit status, if the remote side reported one
    pub exit_status: Option<u32>,
    /// Terminating signal, if any
    pub signal: Option<String>,
    /// Whether the session was force-closed by cancellation
    pub forced: bool,
}

impl Completion {
    /// Translate the outcome into a result.
    ///
    /// An exit status reported before a forced close wins: a command that
    /// finished just as it was cancelled still counts as a success.
    pub fn into_result(self) -> Result<(), CommandError> {
        match (self.exit_status, self.signal) {
            (Some(0), _) => Ok(()),
            (Some(code), _) => Err(CommandError::Exit(code)),
            (None, _) if self.forced => Err(CommandError::Cancelled),
            (None, Some(signal)) => Err(CommandError::Signal(signal)),
            (None, None) => Err(CommandError::MissingStatus),
        }
    }
}

/// One command session on a host.
///
/// Pipes must be taken before the command starts. A taken stdout or stderr
/// pipe must be drained, otherwise the command may block on a full pipe and
/// never complete. Untaken output is discarded; an untaken stdin is closed
/// at start.
#[async_trait]
pub trait CommandRunner: Send {
    fn stdin_pipe(&mut self) -> Result<BoxWriter, CommandError>;

    fn stdout_pipe(&mut self) -> Result<BoxReader, CommandError>;

    fn stderr_pipe(&mut self) -> Result<BoxReader, CommandError>;

    /// Start `cmd`; the session is force-closed if `cancel` fires before
    /// the command completes
    async fn start_with_cancel(
        &mut self,
        cmd: &str,
        cancel: CancellationToken,
    ) -> Result<(), CommandError>;

    /// Wait for a started command and its stdio to finish
    async fn wait(&mut self) -> Result<(), CommandError>;

    /// Start `cmd` without a cancellation source
    async fn start(&mut self, cmd: &str) -> Result<(), CommandError> {
        self.start_with_cancel(cmd, CancellationToken::new()).await
    }

    /// Run `cmd` to completion
    async fn run(&mut self, cmd: &str) -> Result<(), CommandError> {
        self.start(cmd).await?;
        self.wait().await
    }

    /// Run `cmd` to completion, or until `cancel` fires.
    ///
    /// Returns [`CommandError::Cancelled`] if the session had to be closed
    /// before the command reported an exit status.
    async fn run_with_cancel(
        &mut self,
        cancel: &CancellationToken,
        cmd: &str,
    ) -> Result<(), CommandError> {
        self.start_with_cancel(cmd, cancel.clone()).await?;
        self.wait().await
    }

    /// Run `cmd` and collect everything it writes to stdout
    async fn output(&mut self, cmd: &str) -> Result<Vec<u8>, CommandError> {
        self.output_with_cancel(&CancellationToken::new(), cmd).await
    }

    /// Like [`CommandRunner::output`], force-closing the session if `cancel`
    /// fires first
    async fn output_with_cancel(
        &mut self,
        cancel: &CancellationToken,
        cmd: &str,
    ) -> Result<Vec<u8>, CommandError> {
        let mut stdout = self.stdout_pipe()?;
        self.start_with_cancel(cmd, cancel.clone()).await?;
        let mut out = Vec::new();
        let read = stdout.read_to_end(&mut out).await;
        self.wait().await?;
        read?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_success() {
        let c = Completion {
            exit_status: Some(0),
            ..Default::default()
        };
        assert!(c.into_result().is_ok());
    }

    #[test]
    fn test_completion_forced_after_exit_is_success() {
        let c = Completion {
            exit_status: Some(0),
            signal: None,
            forced: true,
        };
        assert!(c.into_result().is_ok());
    }

    #[test]
    fn test_completion_forced_without_status_is_cancelled() {
        let c = Completion {
            forced: true,
            ..Default::default()
        };
        assert!(matches!(c.into_result(), Err(CommandError::Cancelled)));
    }

    #[test]
    fn test_completion_failures() {
        let exit = Completion {
            exit_status: Some(2),
            ..Default::default()
        };
        assert!(matches!(exit.into_result(), Err(CommandError::Exit(2))));

        let signal = Completion {
            signal: Some("KILL".into()),
            ..Default::default()
        };
        assert!(matches!(signal.into_result(), Err(CommandError::Signal(s)) if s == "KILL"));

        assert!(matches!(
            Completion::default().into_result(),
            Err(CommandError::MissingStatus)
        ));
    }
}
