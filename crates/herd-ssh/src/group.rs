//! Connect a set of host aliases

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use herd_core::config::UserEnv;
use herd_core::traits::Host;

use crate::error::ConnectionError;
use crate::host::SshHost;
use crate::resolver::Resolver;
use crate::ssh_config::{config_source, SshConfig};

/// Resolve and dial every alias concurrently.
///
/// `config_path` selects the ssh config file; when `None` the user's
/// `~/.ssh/config` or the system file is used. Either every host connects
/// or none is returned: on the first error, hosts that did connect are
/// closed and the error is returned.
pub async fn connect_group(
    aliases: &[String],
    config_path: Option<&Path>,
    env: &UserEnv,
) -> Result<Vec<Arc<dyn Host>>, ConnectionError> {
    let source = config_source(config_path, env)?;
    tracing::debug!("Reading ssh config from {}", source.display());
    let config = SshConfig::load(&source)?;
    let resolver = Resolver::new(env.clone());

    // resolve everything before dialing anything
    let mut resolved = Vec::with_capacity(aliases.len());
    for alias in aliases {
        resolved.push((alias, resolver.resolve(alias, &config).await?));
    }

    let results = join_all(
        resolved
            .iter()
            .map(|(alias, cfg)| SshHost::connect(alias.as_str(), cfg)),
    )
    .await;

    let mut hosts: Vec<Arc<dyn Host>> = Vec::with_capacity(results.len());
    let mut first_error = None;
    for (result, (alias, _)) in results.into_iter().zip(&resolved) {
        match result {
            Ok(host) => hosts.push(Arc::new(host)),
            Err(e) => {
                tracing::debug!("Connecting to {} failed: {}", alias, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        None => Ok(hosts),
        Some(err) => {
            for host in &hosts {
                if let Err(e) = host.close().await {
                    tracing::debug!("Closing {} after failed group connect: {}", host.name(), e);
                }
            }
            Err(err)
        }
    }
}
