//! OpenSSH client configuration
//!
//! A small reader for `ssh_config(5)` files. Directives are looked up per
//! host alias: every `Host` block whose patterns match the alias is
//! consulted in file order and the first value found wins. Directives
//! before the first `Host` line apply to every alias. When no block sets a
//! directive, the OpenSSH default is used.
//!
//! `Match` blocks and `Include` lines are not evaluated; their contents are
//! skipped.

use std::path::{Path, PathBuf};

use herd_core::config::UserEnv;
use herd_core::error::ConfigError;

/// System-wide client configuration, consulted when the user has none
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ssh/ssh_config";

/// Key/value view of an ssh configuration, keyed by host alias and directive
pub trait ConfigLookup: Send + Sync {
    /// Value explicitly configured for `key` on `alias`
    fn get(&self, alias: &str, key: &str) -> Option<String>;

    /// Configured value, or the OpenSSH default (empty if there is none)
    fn get_or_default(&self, alias: &str, key: &str) -> String {
        self.get(alias, key)
            .unwrap_or_else(|| default_value(key).to_string())
    }
}

/// OpenSSH default for a directive, or `""` when it has none
pub fn default_value(key: &str) -> &'static str {
    let key = key.to_ascii_lowercase();
    DEFAULTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or("")
}

const DEFAULTS: &[(&str, &str)] = &[
    ("addkeystoagent", "no"),
    ("addressfamily", "any"),
    ("batchmode", "no"),
    ("canonicalizefallbacklocal", "yes"),
    ("canonicalizehostname", "no"),
    ("canonicalizemaxdots", "1"),
    ("challengeresponseauthentication", "yes"),
    ("checkhostip", "yes"),
    ("compression", "no"),
    ("connectionattempts", "1"),
    ("controlmaster", "no"),
    ("escapechar", "~"),
    ("exitonforwardfailure", "no"),
    ("fingerprinthash", "sha256"),
    ("forwardagent", "no"),
    ("forwardx11", "no"),
    ("forwardx11timeout", "20m"),
    ("forwardx11trusted", "no"),
    ("gatewayports", "no"),
    (
        "globalknownhostsfile",
        "/etc/ssh/ssh_known_hosts /etc/ssh/ssh_known_hosts2",
    ),
    ("gssapiauthentication", "no"),
    ("gssapidelegatecredentials", "no"),
    ("hashknownhosts", "no"),
    ("hostbasedauthentication", "no"),
    ("identitiesonly", "no"),
    ("identityfile", "~/.ssh/identity"),
    ("kbdinteractiveauthentication", "yes"),
    ("loglevel", "INFO"),
    ("numberofpasswordprompts", "3"),
    ("passwordauthentication", "yes"),
    ("port", "22"),
    ("protocol", "2"),
    ("pubkeyauthentication", "yes"),
    ("requesttty", "auto"),
    ("serveralivecountmax", "3"),
    ("serveraliveinterval", "0"),
    ("stricthostkeychecking", "ask"),
    ("tcpkeepalive", "yes"),
    ("updatehostkeys", "no"),
    (
        "userknownhostsfile",
        "~/.ssh/known_hosts ~/.ssh/known_hosts2",
    ),
    ("verifyhostkeydns", "no"),
    ("visualhostkey", "no"),
    ("xauthlocation", "/usr/X11R6/bin/xauth"),
];

const KEYWORDS: &[&str] = &[
    "addkeystoagent",
    "addressfamily",
    "batchmode",
    "bindaddress",
    "bindinterface",
    "canonicaldomains",
    "canonicalizefallbacklocal",
    "canonicalizehostname",
    "canonicalizemaxdots",
    "canonicalizepermittedcnames",
    "casignaturealgorithms",
    "certificatefile",
    "challengeresponseauthentication",
    "checkhostip",
    "ciphers",
    "clearallforwardings",
    "compression",
    "connectionattempts",
    "connecttimeout",
    "controlmaster",
    "controlpath",
    "controlpersist",
    "dynamicforward",
    "enableescapecommandline",
    "enablesshkeysign",
    "escapechar",
    "exitonforwardfailure",
    "fingerprinthash",
    "forkafterauthentication",
    "forwardagent",
    "forwardx11",
    "forwardx11timeout",
    "forwardx11trusted",
    "gatewayports",
    "globalknownhostsfile",
    "gssapiauthentication",
    "gssapidelegatecredentials",
    "hashknownhosts",
    "host",
    "hostbasedacceptedalgorithms",
    "hostbasedauthentication",
    "hostbasedkeytypes",
    "hostkeyalgorithms",
    "hostkeyalias",
    "hostname",
    "identitiesonly",
    "identityagent",
    "identityfile",
    "ignoreunknown",
    "include",
    "ipqos",
    "kbdinteractiveauthentication",
    "kbdinteractivedevices",
    "kexalgorithms",
    "knownhostscommand",
    "localcommand",
    "localforward",
    "loglevel",
    "logverbose",
    "macs",
    "match",
    "nohostauthenticationforlocalhost",
    "numberofpasswordprompts",
    "obscurekeystroketiming",
    "passwordauthentication",
    "permitlocalcommand",
    "permitremoteopen",
    "pkcs11provider",
    "port",
    "preferredauthentications",
    "protocol",
    "proxycommand",
    "proxyjump",
    "proxyusefdpass",
    "pubkeyacceptedalgorithms",
    "pubkeyacceptedkeytypes",
    "pubkeyauthentication",
    "rekeylimit",
    "remotecommand",
    "remoteforward",
    "requesttty",
    "requiredrsasize",
    "revokedhostkeys",
    "securitykeyprovider",
    "sendenv",
    "serveralivecountmax",
    "serveraliveinterval",
    "sessiontype",
    "setenv",
    "stdinnull",
    "streamlocalbindmask",
    "streamlocalbindunlink",
    "stricthostkeychecking",
    "syslogfacility",
    "tag",
    "tcpkeepalive",
    "tunnel",
    "tunneldevice",
    "updatehostkeys",
    "usekeychain",
    "user",
    "userknownhostsfile",
    "verifyhostkeydns",
    "visualhostkey",
    "xauthlocation",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    glob: String,
    negated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    patterns: Vec<Pattern>,
    /// Lowercased keyword and value, in file order
    directives: Vec<(String, String)>,
}

impl Block {
    fn global() -> Self {
        Self {
            patterns: vec![Pattern {
                glob: "*".to_string(),
                negated: false,
            }],
            directives: Vec::new(),
        }
    }

    fn matches(&self, alias: &str) -> bool {
        let mut matched = false;
        for pattern in &self.patterns {
            if glob_match(&pattern.glob, alias) {
                if pattern.negated {
                    return false;
                }
                matched = true;
            }
        }
        matched
    }
}

/// A parsed ssh client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    blocks: Vec<Block>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            blocks: vec![Block::global()],
        }
    }
}

impl SshConfig {
    /// Parse configuration text. `source` names the text in error messages.
    pub fn parse(source: &str, content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut in_match = false;

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let syntax = |message: String| ConfigError::Syntax {
                path: source.to_string(),
                line: idx + 1,
                message,
            };

            let (keyword, value) = split_directive(line);
            let key = keyword.to_ascii_lowercase();
            if !KEYWORDS.contains(&key.as_str()) {
                return Err(syntax(format!("unknown keyword '{}'", keyword)));
            }
            if value.is_empty() {
                return Err(syntax(format!("missing argument for '{}'", keyword)));
            }

            match key.as_str() {
                "host" => {
                    let mut patterns = Vec::new();
                    for token in value.split_whitespace() {
                        let token = unquote(token).map_err(&syntax)?;
                        let (glob, negated) = match token.strip_prefix('!') {
                            Some(rest) => (rest, true),
                            None => (token, false),
                        };
                        patterns.push(Pattern {
                            glob: glob.to_string(),
                            negated,
                        });
                    }
                    config.blocks.push(Block {
                        patterns,
                        directives: Vec::new(),
                    });
                    in_match = false;
                }
                "match" => {
                    tracing::debug!("{}:{}: skipping Match block", source, idx + 1);
                    in_match = true;
                }
                "include" => {
                    tracing::debug!("{}:{}: Include is not supported, skipping", source, idx + 1);
                }
                _ if in_match => {}
                _ => {
                    let value = unquote(value).map_err(&syntax)?;
                    if let Some(block) = config.blocks.last_mut() {
                        block.directives.push((key.clone(), value.to_string()));
                    }
                }
            }
        }
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&path.display().to_string(), &content)
    }
}

impl ConfigLookup for SshConfig {
    fn get(&self, alias: &str, key: &str) -> Option<String> {
        let key = key.to_ascii_lowercase();
        self.blocks
            .iter()
            .filter(|block| block.matches(alias))
            .flat_map(|block| block.directives.iter())
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }
}

/// Pick the configuration file to read.
///
/// An explicit path is used as given, but must not be empty. Otherwise the
/// user's `~/.ssh/config` is preferred over the system-wide file; it is an
/// error if neither exists.
pub fn config_source(explicit: Option<&Path>, env: &UserEnv) -> Result<PathBuf, ConfigError> {
    let candidates = [env.ssh_dir.join("config"), PathBuf::from(SYSTEM_CONFIG_PATH)];
    select_source(explicit, &candidates)
}

fn select_source(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::NoSource("empty config path".to_string()));
        }
        return Ok(path.to_path_buf());
    }
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<_> = candidates.iter().map(|p| p.display().to_string()).collect();
            ConfigError::NoSource(format!("none of {} exist", tried.join(", ")))
        })
}

fn split_directive(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (keyword, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    (keyword, rest.trim())
}

fn unquote(value: &str) -> Result<&str, String> {
    let starts = value.starts_with('"');
    let ends = value.len() > 1 && value.ends_with('"');
    match (starts, ends) {
        (true, true) => Ok(&value[1..value.len() - 1]),
        (false, false) if !value.contains('"') => Ok(value),
        _ => Err(format!("unbalanced quotes in '{}'", value)),
    }
}

/// Match `name` against a pattern where `*` matches any run of characters
/// and `?` matches exactly one
fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
