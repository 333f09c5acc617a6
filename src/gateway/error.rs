//! Error taxonomy for the gateway and classification of SSH failures.
//!
//! Every failure the gateway can report is a [`GatewayError`] variant. The
//! variant name doubles as the stable `kind` string sent to clients inside a
//! structured failure reply.
//!
//! # Classification Strategy
//!
//! russh reports connection failures as a single error type whose meaning is
//! carried mostly by its message. [`classify_connect_error`] sorts those
//! messages into four buckets:
//!
//! 1. **Authentication failures**: wrong password, denied access.
//! 2. **Host key failures**: unknown or changed server key.
//! 3. **Timeouts / unreachable hosts**: refused, timed out, no route.
//! 4. **Everything else**: SSH protocol or negotiation errors.
//!
//! Authentication patterns take precedence, so a message mentioning both a
//! timeout and a failed authentication is reported as an authentication
//! failure. None of these are retried.

use std::time::Duration;

use serde::Serialize;

/// All failures the gateway distinguishes.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication to {host} failed: {reason}")]
    AuthenticationFailed { host: String, reason: String },

    #[error("host key verification for {host} failed: {reason}")]
    HostKeyMismatch { host: String, reason: String },

    #[error("connection to {host} timed out or host unreachable: {reason}")]
    ConnectTimeout { host: String, reason: String },

    #[error("SSH negotiation with {host} failed: {reason}")]
    ProtocolError { host: String, reason: String },

    #[error("jump to {hostname} through {via} failed: {reason}")]
    ProxyUnreachable {
        hostname: String,
        via: String,
        reason: String,
    },

    #[error("command channel error for `{command}`: {reason}")]
    ChannelError { command: String, reason: String },

    #[error("command `{command}` did not finish within {timeout:?}; partial output: {output:?}")]
    CommandTimeout {
        command: String,
        timeout: Duration,
        output: Vec<String>,
    },

    #[error("transfer of {path} failed: {reason}")]
    TransferError { path: String, reason: String },

    #[error("source file not found: {path}")]
    SourceFileNotFound { path: String },

    #[error("session {0} already exists")]
    DuplicateSession(String),

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("target {address} is already claimed by another session")]
    TargetConflict { address: String },

    #[error("no active target: send ssh_connection_init first")]
    NoActiveTarget,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no reply from gateway within {0:?}")]
    ReplyTimeout(Duration),
}

impl GatewayError {
    /// Stable name of the error kind used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed { .. } => "AuthenticationFailed",
            Self::HostKeyMismatch { .. } => "HostKeyMismatch",
            Self::ConnectTimeout { .. } => "ConnectTimeout",
            Self::ProtocolError { .. } => "ProtocolError",
            Self::ProxyUnreachable { .. } => "ProxyUnreachable",
            Self::ChannelError { .. } => "ChannelError",
            Self::CommandTimeout { .. } => "CommandTimeout",
            Self::TransferError { .. } => "TransferError",
            Self::SourceFileNotFound { .. } => "SourceFileNotFound",
            Self::DuplicateSession(_) => "DuplicateSession",
            Self::UnknownSession(_) => "UnknownSession",
            Self::TargetConflict { .. } => "TargetConflict",
            Self::NoActiveTarget => "NoActiveTarget",
            Self::JobNotFound(_) => "JobNotFound",
            Self::InvalidParams(_) => "InvalidParams",
            Self::Config(_) => "Config",
            Self::Transport(_) => "Transport",
            Self::ReplyTimeout(_) => "ReplyTimeout",
        }
    }

    /// Registry-level errors mean the transport handed us an id it should
    /// not have; the affected session is closed.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::DuplicateSession(_) | Self::UnknownSession(_))
    }

    /// Wire representation used inside failure replies.
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serialized form of a [`GatewayError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// Authentication error patterns.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "keyboard-interactive",
    "permission denied",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "no auth method",
];

/// Host key error patterns.
const HOST_KEY_ERRORS: &[&str] = &[
    "unknown server key",
    "unknown key",
    "key changed",
    "key mismatch",
    "host key",
];

/// Timeout and reachability error patterns.
const TIMEOUT_ERRORS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "network is unreachable",
    "no route to host",
    "host is down",
    "failed to lookup address",
    "name or service not known",
    "temporary failure in name resolution",
];

/// Map a connection-stage failure message for `host` onto the taxonomy.
///
/// # Examples
///
/// ```rust,ignore
/// let err = classify_connect_error("h1:22", "Permission denied");
/// assert_eq!(err.kind(), "AuthenticationFailed");
///
/// let err = classify_connect_error("h1:22", "Unknown server key");
/// assert_eq!(err.kind(), "HostKeyMismatch");
/// ```
pub(crate) fn classify_connect_error(host: &str, message: &str) -> GatewayError {
    let lower = message.to_lowercase();
    let host = host.to_string();
    let reason = message.to_string();

    if AUTH_ERRORS.iter().any(|p| lower.contains(p)) {
        return GatewayError::AuthenticationFailed { host, reason };
    }
    if HOST_KEY_ERRORS.iter().any(|p| lower.contains(p)) {
        return GatewayError::HostKeyMismatch { host, reason };
    }
    if TIMEOUT_ERRORS.iter().any(|p| lower.contains(p)) {
        return GatewayError::ConnectTimeout { host, reason };
    }
    GatewayError::ProtocolError { host, reason }
}
