//! russh client handler

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;

use crate::error::ConnectionError;
use crate::resolver::HostKeyPolicy;

/// Checks the server's host key against the resolved policy
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub(crate) fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = ConnectionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key for {}: {}", self.host, fingerprint);

        match self.policy.verify(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => Err(ConnectionError::HostKeyRejected {
                host: self.host.clone(),
                message: format!(
                    "no known_hosts entry for {} key {}",
                    server_public_key.name(),
                    fingerprint
                ),
            }),
            Err(russh_keys::Error::KeyChanged { line }) => Err(ConnectionError::HostKeyRejected {
                host: self.host.clone(),
                message: format!("key {} differs from known_hosts line {}", fingerprint, line),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;
    use russh_keys::key::KeyPair;

    #[tokio::test]
    async fn test_accept_any() {
        let key = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        let mut handler = ClientHandler::new("h", 22, HostKeyPolicy::AcceptAny);
        assert!(handler.check_server_key(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_changed_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("known_hosts");
        let known = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        let imposter = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        russh_keys::learn_known_hosts_path("h", 2222, &known, &file).unwrap();
        let policy = HostKeyPolicy::KnownHosts(vec![file]);

        let mut handler = ClientHandler::new("h", 2222, policy.clone());
        assert!(handler.check_server_key(&known).await.unwrap());

        let err = handler.check_server_key(&imposter).await.unwrap_err();
        assert!(matches!(err, ConnectionError::HostKeyRejected { .. }));

        let mut handler = ClientHandler::new("other", 2222, policy);
        let err = handler.check_server_key(&known).await.unwrap_err();
        assert!(matches!(err, ConnectionError::HostKeyRejected { host, .. } if host == "other"));
    }
}
