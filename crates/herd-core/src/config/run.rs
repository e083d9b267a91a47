//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Default time budget for one run across a group
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when an action fails on a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Abort the whole process
    #[default]
    Panic,
    /// Log the failure and keep going
    Ignore,
}

/// Description of a run: which hosts to reach and how to treat them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Host aliases, resolved through the ssh config
    pub hosts: Vec<String>,

    /// OpenSSH config file; `~/.ssh/config` then `/etc/ssh/ssh_config` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<PathBuf>,

    /// Time budget for each run
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Failure policy
    pub on_error: ErrorPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            ssh_config: None,
            timeout: DEFAULT_TIMEOUT,
            on_error: ErrorPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: RunConfig = toml::from_str(r#"hosts = ["db-1"]"#).unwrap();
        assert_eq!(config.hosts, vec!["db-1"]);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.on_error, ErrorPolicy::Panic);
        assert!(config.ssh_config.is_none());
    }

    #[test]
    fn test_parse_full() {
        let config: RunConfig = toml::from_str(
            r#"
            hosts = ["a", "b"]
            ssh_config = "/etc/herd/ssh_config"
            timeout = 5
            on_error = "ignore"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.on_error, ErrorPolicy::Ignore);
        assert_eq!(
            config.ssh_config,
            Some(PathBuf::from("/etc/herd/ssh_config"))
        );
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(toml::from_str::<RunConfig>(r#"on_error = "retry""#).is_err());
    }
}
