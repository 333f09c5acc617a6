//! Configuration resolution for the gateway and its client.
//!
//! Settings come from a key-value file (`KEY=VALUE` lines) that is loaded
//! into the process environment at startup, and are then resolved with a
//! three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from the environment or the config file
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Keys
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_IP` | 0.0.0.0 | Listen address |
//! | `GATEWAY_PORT` | 5000 | Listen port |
//! | `GATEWAY_WORKDIR` | cwd | Base directory for local transfer paths |
//! | `SSH_CONNECT_TIMEOUT` | 120s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 300s | Command and transfer timeout in seconds |
//! | `SSH_KNOWN_HOSTS` | unset | known_hosts file enabling strict host key checks |
//! | `GATEWAY_URL` | ws://127.0.0.1:5000/ | Client: gateway URL |
//! | `GATEWAY_REPLY_TIMEOUT` | 300s | Client: reply wait in seconds |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::GatewayError;
use super::types::{Credentials, DEFAULT_SSH_PORT};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gateway.conf";

/// Default listen address
pub(crate) const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default listen port
pub(crate) const DEFAULT_LISTEN_PORT: u16 = 5000;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 120;

/// Default command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Default client reply timeout in seconds
pub(crate) const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 300;

/// Default gateway URL used by the client
pub(crate) const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:5000/";

pub(crate) const CONFIG_PATH_ENV_VAR: &str = "GATEWAY_CONFIG";
pub(crate) const LISTEN_IP_ENV_VAR: &str = "GATEWAY_IP";
pub(crate) const LISTEN_PORT_ENV_VAR: &str = "GATEWAY_PORT";
pub(crate) const WORKDIR_ENV_VAR: &str = "GATEWAY_WORKDIR";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "SSH_KNOWN_HOSTS";
pub(crate) const GATEWAY_URL_ENV_VAR: &str = "GATEWAY_URL";
pub(crate) const REPLY_TIMEOUT_ENV_VAR: &str = "GATEWAY_REPLY_TIMEOUT";
pub(crate) const TARGET_IP_ENV_VAR: &str = "SSH_IP";
pub(crate) const TARGET_HOSTNAME_ENV_VAR: &str = "SSH_HOSTNAME";
pub(crate) const TARGET_USER_ENV_VAR: &str = "SSH_USER";
pub(crate) const TARGET_PASS_ENV_VAR: &str = "SSH_PASS";
pub(crate) const TARGET_PORT_ENV_VAR: &str = "SSH_PORT";

/// Path of the configuration file: `GATEWAY_CONFIG` or [`DEFAULT_CONFIG_FILE`].
pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load a key-value configuration file into the process environment.
///
/// Variables already present in the environment are not overridden. A
/// missing or unreadable file is an error; the server treats it as fatal.
pub fn load_config_file(path: &Path) -> Result<(), GatewayError> {
    if !path.exists() {
        return Err(GatewayError::Config(format!(
            "can't start because no config file was found at {}",
            path.display()
        )));
    }
    dotenv::from_path(path)
        .map_err(|e| GatewayError::Config(format!("failed to load {}: {}", path.display(), e)))
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the connection timeout value with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the command execution timeout value with priority: parameter -> env var -> default
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the client reply timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_reply_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = timeout_param
        .or_else(|| env_parsed(REPLY_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Resolve the known_hosts path. No default: absent means accept all keys.
pub(crate) fn resolve_known_hosts(path_param: Option<PathBuf>) -> Option<PathBuf> {
    path_param.or_else(|| env_string(KNOWN_HOSTS_ENV_VAR).map(PathBuf::from))
}

/// Resolve the working directory for local transfer paths.
pub(crate) fn resolve_workdir(workdir_param: Option<PathBuf>) -> PathBuf {
    workdir_param
        .or_else(|| env_string(WORKDIR_ENV_VAR).map(PathBuf::from))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// SSH behavior shared by every connection the gateway opens.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub known_hosts: Option<PathBuf>,
}

impl SshSettings {
    /// Resolve every setting from the environment and defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(None),
            command_timeout: resolve_command_timeout(None),
            known_hosts: resolve_known_hosts(None),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            known_hosts: None,
        }
    }
}

/// Server process configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_ip: String,
    pub listen_port: u16,
    pub workdir: PathBuf,
    pub ssh: SshSettings,
}

impl GatewayConfig {
    /// Resolve the server configuration from the environment.
    pub fn from_env() -> Result<Self, GatewayError> {
        let listen_port = match env::var(LISTEN_PORT_ENV_VAR) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|e| {
                GatewayError::Config(format!("invalid {LISTEN_PORT_ENV_VAR} {raw:?}: {e}"))
            })?,
            Err(_) => DEFAULT_LISTEN_PORT,
        };

        Ok(Self {
            listen_ip: env_string(LISTEN_IP_ENV_VAR).unwrap_or_else(|| DEFAULT_LISTEN_IP.into()),
            listen_port,
            workdir: resolve_workdir(None),
            ssh: SshSettings::from_env(),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }
}

/// Client process configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub reply_timeout: Duration,
    pub target: Credentials,
}

impl ClientConfig {
    /// Resolve the client configuration; target credentials are required.
    pub fn from_env() -> Result<Self, GatewayError> {
        let missing = |key: &str| GatewayError::Config(format!("missing {key}"));

        let address = env_string(TARGET_IP_ENV_VAR).ok_or_else(|| missing(TARGET_IP_ENV_VAR))?;
        let user = env_string(TARGET_USER_ENV_VAR).ok_or_else(|| missing(TARGET_USER_ENV_VAR))?;
        let secret = env_string(TARGET_PASS_ENV_VAR).ok_or_else(|| missing(TARGET_PASS_ENV_VAR))?;

        let mut target = Credentials::new(address, user, secret)
            .with_port(env_parsed(TARGET_PORT_ENV_VAR).unwrap_or(DEFAULT_SSH_PORT));
        if let Some(hostname) = env_string(TARGET_HOSTNAME_ENV_VAR) {
            target = target.with_hostname(hostname);
        }

        Ok(Self {
            gateway_url: env_string(GATEWAY_URL_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.into()),
            reply_timeout: resolve_reply_timeout(None),
            target,
        })
    }
}
