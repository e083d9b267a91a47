//! SSH-backed host

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use herd_core::error::{CloseError, CommandError};
use herd_core::traits::{CommandRunner, Host, Vfs};
use herd_core::vars::VarStore;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;

use crate::client::ClientHandler;
use crate::command::SshCommand;
use crate::error::ConnectionError;
use crate::resolver::{ResolvedConfig, Signer};
use crate::sftp::SftpFs;

/// Dial timeout when the configuration sets no `ConnectTimeout`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected remote host.
///
/// Holds one SSH connection, one SFTP session and the environment captured
/// right after login. Each command runs on its own session channel.
pub struct SshHost {
    name: String,
    address: String,
    handle: Mutex<Handle<ClientHandler>>,
    sftp: Arc<SftpSession>,
    fs: Arc<SftpFs>,
    env: HashMap<String, String>,
    vars: VarStore,
    closed: AtomicBool,
}

impl SshHost {
    /// Dial, authenticate, snapshot the environment and open SFTP.
    ///
    /// Nothing is retried. If any step after the dial fails the connection
    /// is torn down before the error is returned.
    pub async fn connect(
        name: impl Into<String>,
        config: &ResolvedConfig,
    ) -> Result<Self, ConnectionError> {
        let name = name.into();
        let address = config.address();
        let handler = ClientHandler::new(
            config.hostname.clone(),
            config.port,
            config.host_key_policy.clone(),
        );
        let timeout = config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        tracing::debug!("Connecting to {} at {}", name, address);
        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(Arc::new(Config::default()), address.as_str(), handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(address.clone()))??;

        let setup = async {
            authenticate(&mut handle, config).await?;
            let env = capture_env(&handle)
                .await
                .map_err(|source| ConnectionError::Environment {
                    host: name.clone(),
                    source,
                })?;
            let sftp = open_sftp(&handle).await?;
            Ok::<_, ConnectionError>((env, sftp))
        }
        .await;

        let (env, sftp) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(err) = handle
                    .disconnect(Disconnect::ByApplication, "setup failed", "en")
                    .await
                {
                    tracing::debug!("Disconnect from {} after failed setup: {}", name, err);
                }
                return Err(e);
            }
        };

        tracing::info!("Connected to {} ({}@{})", name, config.user, address);
        let sftp = Arc::new(sftp);
        Ok(Self {
            fs: Arc::new(SftpFs::new(Arc::clone(&sftp), "/")),
            name,
            address,
            handle: Mutex::new(handle),
            sftp,
            env,
            vars: VarStore::new(),
            closed: AtomicBool::new(false),
        })
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    config: &ResolvedConfig,
) -> Result<(), ConnectionError> {
    #[cfg(unix)]
    let mut agent = None;

    for signer in &config.signers {
        tracing::debug!("Offering {:?} as {}", signer, config.user);
        let accepted = match signer {
            Signer::Key { pair, .. } => {
                handle
                    .authenticate_publickey(&config.user, Arc::clone(pair))
                    .await?
            }
            #[cfg(unix)]
            Signer::Agent { sock, key } => {
                use russh_keys::agent::client::AgentClient;

                let client = match agent.take() {
                    Some(client) => client,
                    None => match AgentClient::connect_uds(sock).await {
                        Ok(client) => client,
                        Err(e) => {
                            tracing::debug!("ssh agent at {} unavailable: {}", sock.display(), e);
                            continue;
                        }
                    },
                };
                let (client, result) = handle
                    .authenticate_future(config.user.as_str(), key.clone(), client)
                    .await;
                agent = Some(client);
                match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::debug!("ssh agent signing failed: {}", e);
                        false
                    }
                }
            }
            #[cfg(not(unix))]
            Signer::Agent { .. } => false,
        };
        if accepted {
            return Ok(());
        }
    }

    Err(ConnectionError::AuthRejected {
        user: config.user.clone(),
        host: config.address(),
    })
}

async fn capture_env(
    handle: &Handle<ClientHandler>,
) -> Result<HashMap<String, String>, CommandError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(CommandError::transport)?;
    let out = SshCommand::new(channel).output("env").await?;
    Ok(parse_env(&String::from_utf8_lossy(&out)))
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession, ConnectionError> {
    let channel = handle.channel_open_session().await?;
    channel.request_subsystem(true, "sftp").await?;
    Ok(SftpSession::new(channel.into_stream()).await?)
}

/// Parse `env` output. Lines without a `=` after a non-empty name are skipped.
pub(crate) fn parse_env(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| match line.find('=') {
            Some(i) if i > 0 => Some((line[..i].to_string(), line[i + 1..].to_string())),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Host for SshHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    fn fs(&self) -> Arc<dyn Vfs> {
        self.fs.clone()
    }

    async fn new_command(&self) -> Result<Box<dyn CommandRunner>, CommandError> {
        let channel = self
            .handle
            .lock()
            .await
            .channel_open_session()
            .await
            .map_err(CommandError::transport)?;
        Ok(Box::new(SshCommand::new(channel)))
    }

    async fn close(&self) -> Result<(), CloseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Closing connection to {}", self.name);

        let mut errors = CloseError::default();
        if let Err(e) = self.sftp.close().await {
            errors.push("sftp", e);
        }
        if let Err(e) = self
            .handle
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            errors.push("ssh", e);
        }
        errors.into_result()
    }

    fn vars(&self) -> &VarStore {
        &self.vars
    }
}
