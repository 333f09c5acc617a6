//! Data model and wire types.
//!
//! This module contains the per-session credential record, the client message
//! envelope, and the reply/frame types exchanged over the transport. Wire
//! field names follow the established protocol (`ssh_ip`, `ssh_user`, ...);
//! descriptive aliases are accepted on input.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorDetail, GatewayError};

/// Default SSH port used when the client does not send one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Message type for gateway housekeeping requests.
pub const TYPE_SYSTEM: &str = "system";
/// Message type for job invocations.
pub const TYPE_MODULE: &str = "module";
/// System job: list registered job names.
pub const JOB_LIST_COMMANDS: &str = "get_server_command_list";
/// System job: set the session's remote target.
pub const JOB_CONNECTION_INIT: &str = "ssh_connection_init";
/// Module group whose `func` names a registered job.
pub const JOB_GROUP_SSH: &str = "ssh";
/// Event name used for broadcast log lines.
pub const LOG_EVENT: &str = "server_log";

/// Remote target parameters for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// First-hop address (HA) given by the client.
    pub address: String,
    /// Hostname of the real target; when set and different from HA's own
    /// hostname the handler jumps through HA.
    pub hostname: Option<String>,
    pub username: String,
    pub secret: String,
    pub port: u16,
}

impl Credentials {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            hostname: None,
            username: username.into(),
            secret: secret.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `address:port` of the first hop.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Per-session record: either fully populated or empty.
///
/// The whole record is replaced in one assignment, so readers never see a
/// half-written target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord(Option<Credentials>);

impl CredentialRecord {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn populated(credentials: Credentials) -> Self {
        Self(Some(credentials))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.0.as_ref()
    }

    pub fn address(&self) -> Option<&str> {
        self.0.as_ref().map(|c| c.address.as_str())
    }
}

/// Port accepted either as a number or as a numeric string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn resolve(&self) -> Result<u16, GatewayError> {
        match self {
            PortValue::Number(port) => Ok(*port),
            PortValue::Text(text) => text
                .trim()
                .parse::<u16>()
                .map_err(|e| GatewayError::InvalidParams(format!("invalid ssh_port {text:?}: {e}"))),
        }
    }
}

/// Parameters of a `ssh_connection_init` message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitParams {
    #[serde(default, alias = "address", skip_serializing_if = "Option::is_none")]
    pub ssh_ip: Option<String>,
    #[serde(default, alias = "hostname", skip_serializing_if = "Option::is_none")]
    pub ssh_hostname: Option<String>,
    #[serde(
        default,
        alias = "user",
        alias = "username",
        skip_serializing_if = "Option::is_none"
    )]
    pub ssh_user: Option<String>,
    #[serde(
        default,
        alias = "secret",
        alias = "password",
        skip_serializing_if = "Option::is_none"
    )]
    pub ssh_pass: Option<String>,
    #[serde(default, alias = "port", skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<PortValue>,
}

fn required(field: &str, value: Option<String>) -> Result<String, GatewayError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GatewayError::InvalidParams(format!(
            "missing required field `{field}`"
        ))),
    }
}

impl InitParams {
    /// Validate and convert into a fully populated [`Credentials`].
    ///
    /// Address, user and secret must be present and non-empty; an empty
    /// hostname counts as absent.
    pub fn into_credentials(self) -> Result<Credentials, GatewayError> {
        let address = required("ssh_ip", self.ssh_ip)?;
        let username = required("ssh_user", self.ssh_user)?;
        let secret = required("ssh_pass", self.ssh_pass)?;
        let port = match self.ssh_port {
            Some(port) => port.resolve()?,
            None => DEFAULT_SSH_PORT,
        };
        if port == 0 {
            return Err(GatewayError::InvalidParams("ssh_port must be non-zero".into()));
        }

        Ok(Credentials {
            address,
            hostname: self.ssh_hostname.filter(|h| !h.trim().is_empty()),
            username,
            secret,
            port,
        })
    }
}

impl From<&Credentials> for InitParams {
    fn from(c: &Credentials) -> Self {
        Self {
            ssh_ip: Some(c.address.clone()),
            ssh_hostname: c.hostname.clone(),
            ssh_user: Some(c.username.clone()),
            ssh_pass: Some(c.secret.clone()),
            ssh_port: Some(PortValue::Number(c.port)),
        }
    }
}

/// Message envelope sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl ClientMessage {
    pub fn list_jobs() -> Self {
        Self {
            kind: TYPE_SYSTEM.to_string(),
            job: JOB_LIST_COMMANDS.to_string(),
            func: None,
            params: Value::Null,
        }
    }

    pub fn connection_init(params: &InitParams) -> Self {
        Self {
            kind: TYPE_SYSTEM.to_string(),
            job: JOB_CONNECTION_INIT.to_string(),
            func: None,
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }

    pub fn run_job(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: TYPE_MODULE.to_string(),
            job: JOB_GROUP_SSH.to_string(),
            func: Some(name.into()),
            params: Value::Array(args),
        }
    }

    /// Positional job arguments.
    ///
    /// A list is taken as is, `null` and the empty string mean no arguments,
    /// any other value becomes a single argument.
    pub fn positional_args(&self) -> Vec<Value> {
        match &self.params {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            Value::String(s) if s.is_empty() => Vec::new(),
            other => vec![other.clone()],
        }
    }
}

/// Exit code and trimmed output lines of a remote command.
///
/// Serialized as the pair `[exit_code, [lines...]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(i32, Vec<String>)", from = "(i32, Vec<String>)")]
pub struct ExecOutput {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

impl ExecOutput {
    /// Split raw output into lines with trailing whitespace removed.
    pub fn from_raw(exit_code: i32, raw: &str) -> Self {
        Self {
            exit_code,
            lines: raw.lines().map(|l| l.trim_end().to_string()).collect(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<ExecOutput> for (i32, Vec<String>) {
    fn from(out: ExecOutput) -> Self {
        (out.exit_code, out.lines)
    }
}

impl From<(i32, Vec<String>)> for ExecOutput {
    fn from((exit_code, lines): (i32, Vec<String>)) -> Self {
        Self { exit_code, lines }
    }
}

/// Acknowledgment for system requests and structured job failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            result: true,
            error: None,
        }
    }

    pub fn failed(error: &GatewayError) -> Self {
        Self {
            result: false,
            error: Some(error.to_detail()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Frames the server writes to a client socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to the client's most recent message.
    Reply(Value),
    /// Broadcast log line.
    ServerLog(String),
}
