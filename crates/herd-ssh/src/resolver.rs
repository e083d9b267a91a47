//! Connection resolver
//!
//! Turns a host alias and an ssh configuration into everything needed to
//! dial the host: user, signers, host-key policy and address. Nothing is
//! cached; every call reads the configuration and key material afresh.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use herd_core::config::UserEnv;
use herd_core::error::ConfigError;
use russh_keys::key::{KeyPair, PublicKey};

use crate::ssh_config::ConfigLookup;

/// Credential offered to the server during public-key authentication
#[derive(Clone)]
pub enum Signer {
    /// Identity held by a running ssh agent
    Agent { sock: PathBuf, key: PublicKey },
    /// Unencrypted private key read from an identity file
    Key { path: PathBuf, pair: Arc<KeyPair> },
}

impl Signer {
    /// Fingerprint of the public half
    pub fn fingerprint(&self) -> String {
        match self {
            Signer::Agent { key, .. } => key.fingerprint(),
            Signer::Key { pair, .. } => pair
                .clone_public_key()
                .map(|key| key.fingerprint())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signer::Agent { sock, .. } => f
                .debug_struct("Agent")
                .field("sock", sock)
                .field("fingerprint", &self.fingerprint())
                .finish(),
            Signer::Key { path, .. } => f
                .debug_struct("Key")
                .field("path", path)
                .field("fingerprint", &self.fingerprint())
                .finish(),
        }
    }
}

/// How the server's host key is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents (`StrictHostKeyChecking no`)
    AcceptAny,
    /// Require a matching entry in one of these known_hosts files
    KnownHosts(Vec<PathBuf>),
}

impl HostKeyPolicy {
    /// Build a known_hosts policy. Files that do not exist are skipped;
    /// files that exist but cannot be read are an error.
    pub fn known_hosts<I>(paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut files = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            std::fs::File::open(&path).map_err(|e| ConfigError::Read {
                path: path.clone(),
                source: e,
            })?;
            files.push(path);
        }
        Ok(Self::KnownHosts(files))
    }

    /// Check `key` for `host:port`.
    ///
    /// Returns `Ok(false)` when no file knows the host, and
    /// `Err(KeyChanged)` when a file records a different key for it.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<bool, russh_keys::Error> {
        match self {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts(files) => {
                for file in files {
                    if russh_keys::check_known_hosts_path(host, port, key, file)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Everything needed to dial and authenticate to one host
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub user: String,
    pub hostname: String,
    pub port: u16,
    pub signers: Vec<Signer>,
    pub host_key_policy: HostKeyPolicy,
    /// `ConnectTimeout`, when configured
    pub connect_timeout: Option<Duration>,
}

impl ResolvedConfig {
    /// `host:port`, with IPv6 literals bracketed
    pub fn address(&self) -> String {
        join_host_port(&self.hostname, self.port)
    }
}

/// Resolves host aliases for one user
#[derive(Debug, Clone)]
pub struct Resolver {
    env: UserEnv,
}

impl Resolver {
    pub fn new(env: UserEnv) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &UserEnv {
        &self.env
    }

    /// Resolve `alias` against `lookup`.
    ///
    /// Fails without touching the network if the configuration is invalid
    /// or if neither the agent nor the identity file yields a signer.
    pub async fn resolve(
        &self,
        alias: &str,
        lookup: &dyn ConfigLookup,
    ) -> Result<ResolvedConfig, ConfigError> {
        let (hostname, port) = target(alias, lookup)?;
        let host_key_policy = self.host_key_policy(alias, lookup)?;

        let mut signers = self.agent_signers().await;
        let identity_file = lookup.get_or_default(alias, "IdentityFile");
        if let Some(signer) = self.file_signer(&identity_file) {
            signers.push(signer);
        }
        if signers.is_empty() {
            return Err(ConfigError::NoSigners(alias.to_string()));
        }

        let user = lookup
            .get(alias, "User")
            .unwrap_or_else(|| self.env.username.clone());

        let connect_timeout = match lookup.get(alias, "ConnectTimeout") {
            Some(secs) => Some(Duration::from_secs(secs.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid ConnectTimeout '{}' for host '{}'",
                    secs, alias
                ))
            })?)),
            None => None,
        };

        tracing::debug!(
            "Resolved {} to {}@{}:{} with {} signer(s)",
            alias,
            user,
            hostname,
            port,
            signers.len()
        );

        Ok(ResolvedConfig {
            user,
            hostname,
            port,
            signers,
            host_key_policy,
            connect_timeout,
        })
    }

    fn host_key_policy(
        &self,
        alias: &str,
        lookup: &dyn ConfigLookup,
    ) -> Result<HostKeyPolicy, ConfigError> {
        let strict = lookup.get_or_default(alias, "StrictHostKeyChecking");
        if strict.eq_ignore_ascii_case("no") {
            return Ok(HostKeyPolicy::AcceptAny);
        }
        let files = lookup.get_or_default(alias, "UserKnownHostsFile");
        HostKeyPolicy::known_hosts(
            files
                .split_whitespace()
                .map(|file| self.env.expand_tilde(file)),
        )
    }

    fn file_signer(&self, identity_file: &str) -> Option<Signer> {
        if identity_file.is_empty() {
            return None;
        }
        let path = self.env.expand_tilde(identity_file);
        if !path.exists() {
            return None;
        }
        match russh_keys::load_secret_key(&path, None) {
            Ok(pair) => Some(Signer::Key {
                path,
                pair: Arc::new(pair),
            }),
            Err(e) => {
                tracing::debug!("Skipping identity file {}: {}", path.display(), e);
                None
            }
        }
    }

    #[cfg(unix)]
    async fn agent_signers(&self) -> Vec<Signer> {
        let Some(sock) = &self.env.auth_sock else {
            return Vec::new();
        };
        let mut agent = match russh_keys::agent::client::AgentClient::connect_uds(sock).await {
            Ok(agent) => agent,
            Err(e) => {
                tracing::debug!("ssh agent at {} unavailable: {}", sock.display(), e);
                return Vec::new();
            }
        };
        match agent.request_identities().await {
            Ok(keys) => keys
                .into_iter()
                .map(|key| Signer::Agent {
                    sock: sock.clone(),
                    key,
                })
                .collect(),
            Err(e) => {
                tracing::debug!("ssh agent refused to list identities: {}", e);
                Vec::new()
            }
        }
    }

    #[cfg(not(unix))]
    async fn agent_signers(&self) -> Vec<Signer> {
        Vec::new()
    }
}

/// Address to dial for `alias`, without resolving any credentials
pub fn connect_addr(alias: &str, lookup: &dyn ConfigLookup) -> Result<String, ConfigError> {
    let (hostname, port) = target(alias, lookup)?;
    Ok(join_host_port(&hostname, port))
}

fn target(alias: &str, lookup: &dyn ConfigLookup) -> Result<(String, u16), ConfigError> {
    let hostname = lookup
        .get(alias, "Hostname")
        .unwrap_or_else(|| alias.to_string());
    let port = lookup.get_or_default(alias, "Port");
    let port = port.parse().map_err(|_| {
        ConfigError::Invalid(format!("invalid port '{}' for host '{}'", port, alias))
    })?;
    Ok((hostname, port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh_config::SshConfig;
    use std::path::Path;

    const CONFIG: &str = r#"
Host localhost
    Hostname 127.0.0.1

Host 127.*
    Hostname 127.0.0.1
    User testuser

Host Connect*
    Port 1234

Host insecure
    StrictHostKeyChecking no

Host badport
    Port eighty

Host *
    IdentityFile ~/.ssh/id_test
"#;

    fn write_key(path: &Path) -> KeyPair {
        let pair = KeyPair::generate_ed25519().unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        russh_keys::encode_pkcs8_pem(&pair, &mut file).unwrap();
        pair
    }

    fn fixture() -> (tempfile::TempDir, Resolver, SshConfig) {
        let dir = tempfile::tempdir().unwrap();
        let env = UserEnv::new("osuser", dir.path());
        std::fs::create_dir_all(&env.ssh_dir).unwrap();
        write_key(&env.ssh_dir.join("id_test"));
        let config = SshConfig::parse("test", CONFIG).unwrap();
        (dir, Resolver::new(env), config)
    }

    #[tokio::test]
    async fn test_resolve_pattern_cases() {
        let (_dir, resolver, config) = fixture();

        let cfg = resolver.resolve("localhost", &config).await.unwrap();
        assert_eq!(cfg.address(), "127.0.0.1:22");
        assert_eq!(cfg.user, "osuser");

        let cfg = resolver.resolve("127.0.1.2", &config).await.unwrap();
        assert_eq!(cfg.address(), "127.0.0.1:22");
        assert_eq!(cfg.user, "testuser");

        let cfg = resolver.resolve("ConnectTest", &config).await.unwrap();
        assert_eq!(cfg.address(), "ConnectTest:1234");

        let cfg = resolver.resolve("elsewhere", &config).await.unwrap();
        assert_eq!(cfg.address(), "elsewhere:22");
    }

    #[test]
    fn test_connect_addr() {
        let config = SshConfig::parse("test", CONFIG).unwrap();
        assert_eq!(connect_addr("localhost", &config).unwrap(), "127.0.0.1:22");
        assert_eq!(connect_addr("ConnectTest", &config).unwrap(), "ConnectTest:1234");
        assert_eq!(connect_addr("anything", &config).unwrap(), "anything:22");
        assert!(matches!(
            connect_addr("badport", &config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("::1", 22), "[::1]:22");
        assert_eq!(join_host_port("example.com", 2222), "example.com:2222");
    }

    #[tokio::test]
    async fn test_resolve_loads_identity_file() {
        let (_dir, resolver, config) = fixture();
        let cfg = resolver.resolve("localhost", &config).await.unwrap();
        assert_eq!(cfg.signers.len(), 1);
        match &cfg.signers[0] {
            Signer::Key { path, .. } => assert!(path.ends_with(".ssh/id_test")),
            other => panic!("unexpected signer: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_signers_names_alias() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(UserEnv::new("osuser", dir.path()));
        let config = SshConfig::parse("test", CONFIG).unwrap();
        let err = resolver.resolve("localhost", &config).await.unwrap_err();
        assert!(matches!(err, ConfigError::NoSigners(alias) if alias == "localhost"));
    }

    #[tokio::test]
    async fn test_garbage_identity_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let env = UserEnv::new("osuser", dir.path());
        std::fs::create_dir_all(&env.ssh_dir).unwrap();
        std::fs::write(env.ssh_dir.join("id_test"), "not a key").unwrap();
        let resolver = Resolver::new(env);
        let config = SshConfig::parse("test", CONFIG).unwrap();
        assert!(matches!(
            resolver.resolve("localhost", &config).await,
            Err(ConfigError::NoSigners(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_agent_yields_no_signers() {
        let dir = tempfile::tempdir().unwrap();
        let env = UserEnv::new("osuser", dir.path()).with_auth_sock(dir.path().join("no.sock"));
        let resolver = Resolver::new(env);
        assert!(resolver.agent_signers().await.is_empty());
    }

    #[tokio::test]
    async fn test_host_key_policy_selection() {
        let (_dir, resolver, config) = fixture();

        let cfg = resolver.resolve("insecure", &config).await.unwrap();
        assert_eq!(cfg.host_key_policy, HostKeyPolicy::AcceptAny);

        // neither default known_hosts file exists in the fabricated home
        let cfg = resolver.resolve("localhost", &config).await.unwrap();
        assert_eq!(cfg.host_key_policy, HostKeyPolicy::KnownHosts(Vec::new()));

        std::fs::write(resolver.env().ssh_dir.join("known_hosts2"), "").unwrap();
        let cfg = resolver.resolve("localhost", &config).await.unwrap();
        assert_eq!(
            cfg.host_key_policy,
            HostKeyPolicy::KnownHosts(vec![resolver.env().ssh_dir.join("known_hosts2")])
        );
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let (_dir, resolver, config) = fixture();
        let first = resolver.resolve("127.0.1.2", &config).await.unwrap();
        let second = resolver.resolve("127.0.1.2", &config).await.unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(first.user, second.user);
        assert_eq!(first.host_key_policy, second.host_key_policy);
        let prints = |c: &ResolvedConfig| {
            c.signers.iter().map(Signer::fingerprint).collect::<Vec<_>>()
        };
        assert_eq!(prints(&first), prints(&second));
    }

    #[test]
    fn test_known_hosts_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("known_hosts");
        let server = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        let other = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        russh_keys::learn_known_hosts_path("server.example", 22, &server, &file).unwrap();

        let policy = HostKeyPolicy::known_hosts(vec![
            dir.path().join("missing"),
            file.clone(),
        ])
        .unwrap();
        assert_eq!(policy, HostKeyPolicy::KnownHosts(vec![file]));

        assert!(policy.verify("server.example", 22, &server).unwrap());
        assert!(!policy.verify("unknown.example", 22, &server).unwrap());
        assert!(matches!(
            policy.verify("server.example", 22, &other),
            Err(russh_keys::Error::KeyChanged { .. })
        ));

        assert!(HostKeyPolicy::AcceptAny.verify("x", 22, &other).unwrap());
    }
}
