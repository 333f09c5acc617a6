//! SSH client connection, command execution, tunneling and SFTP.
//!
//! This module implements the [`Dialer`] and [`RemoteSession`] seams on top of
//! russh:
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: inactivity timeout plus a 30 second keepalive.
//! 2. **Connection Establishment**: TCP dial (or a `direct-tcpip` channel for a
//!    jump) bounded by the connect timeout.
//! 3. **Authentication**: password, then keyboard-interactive with the same
//!    secret, via [`AuthChain`].
//! 4. **Command Execution**: one session channel per command; stdout and
//!    stderr are merged in arrival order.
//! 5. **File Transfer**: one SFTP subsystem channel per transfer, closed on
//!    every exit path.
//!
//! Connection failures are classified with
//! [`classify_connect_error`](super::error::classify_connect_error) and never
//! retried.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::auth::{AuthChain, AuthStrategy};
use super::config::SshSettings;
use super::connection::{Dialer, RemoteSession};
use super::error::{GatewayError, classify_connect_error};
use super::session::{HostKeyPolicy, SshClientHandler};
use super::types::{Credentials, ExecOutput};

/// Build russh client configuration.
///
/// Creates an `Arc<client::Config>` with:
/// - Inactivity timeout set to `inactivity`
/// - Keepalive interval of 30 seconds with max 3 keepalives
pub(crate) fn build_client_config(inactivity: Duration) -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: Some(inactivity),
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    })
}

/// Authenticate a fresh handle with the password/keyboard-interactive chain.
async fn authenticate(
    handle: &mut Handle<SshClientHandler>,
    label: &str,
    credentials: &Credentials,
) -> Result<(), GatewayError> {
    let chain = AuthChain::for_secret(&credentials.secret);
    match chain.authenticate(handle, &credentials.username).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(GatewayError::AuthenticationFailed {
            host: label.to_string(),
            reason: "All authentication methods failed".into(),
        }),
        Err(reason) => Err(GatewayError::AuthenticationFailed {
            host: label.to_string(),
            reason,
        }),
    }
}

/// Establish an SSH connection to `host:port` and authenticate.
///
/// 1. Builds client configuration
/// 2. Connects with timeout
/// 3. Authenticates via [`AuthChain`]
pub(crate) async fn connect_to_ssh(
    host: &str,
    credentials: &Credentials,
    settings: &SshSettings,
    policy: HostKeyPolicy,
) -> Result<Handle<SshClientHandler>, GatewayError> {
    let endpoint = format!("{}:{}", host, credentials.port);
    let config = build_client_config(settings.command_timeout);
    let handler = SshClientHandler::new(host, credentials.port, policy);

    let connect_future = client::connect(config, (host, credentials.port), handler);

    let mut handle = tokio::time::timeout(settings.connect_timeout, connect_future)
        .await
        .map_err(|_| GatewayError::ConnectTimeout {
            host: endpoint.clone(),
            reason: format!("Connection timed out after {:?}", settings.connect_timeout),
        })?
        .map_err(|e| classify_connect_error(&endpoint, &e.to_string()))?;

    authenticate(&mut handle, &endpoint, credentials).await?;
    info!("SSH connection established to {}@{}", credentials.username, endpoint);
    Ok(handle)
}

/// Dials first-hop hosts with the configured timeouts and host key policy.
#[derive(Debug, Clone)]
pub struct SshDialer {
    settings: SshSettings,
    policy: HostKeyPolicy,
}

impl SshDialer {
    pub fn new(settings: SshSettings) -> Self {
        let policy = HostKeyPolicy::from_known_hosts(settings.known_hosts.clone());
        Self { settings, policy }
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, GatewayError> {
        let handle = connect_to_ssh(
            &credentials.address,
            credentials,
            &self.settings,
            self.policy.clone(),
        )
        .await?;
        Ok(Box::new(SshSession {
            handle,
            label: format!("{}@{}", credentials.username, credentials.endpoint()),
            settings: self.settings.clone(),
            policy: self.policy.clone(),
        }))
    }
}

/// An authenticated russh connection.
pub struct SshSession {
    handle: Handle<SshClientHandler>,
    label: String,
    settings: SshSettings,
    policy: HostKeyPolicy,
}

impl SshSession {
    async fn open_sftp(&self, path: &str) -> Result<SftpSession, GatewayError> {
        let transfer_err = |reason: String| GatewayError::TransferError {
            path: path.to_string(),
            reason,
        };

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| transfer_err(format!("Failed to open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| transfer_err(format!("Failed to request SFTP subsystem: {}", e)))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| transfer_err(format!("Failed to start SFTP session: {}", e)))
    }

    /// Run `transfer` on a fresh SFTP session bounded by the command timeout,
    /// then close the session whatever the outcome.
    async fn with_sftp<F, Fut>(&self, path: &str, transfer: F) -> Result<(), GatewayError>
    where
        F: FnOnce(Arc<SftpSession>) -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let sftp = Arc::new(self.open_sftp(path).await?);
        let timeout = self.settings.command_timeout;

        let outcome = match tokio::time::timeout(timeout, transfer(sftp.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err(format!("transfer did not finish within {:?}", timeout)),
        };

        if let Err(e) = sftp.close().await {
            debug!("SFTP close for {} failed: {}", path, e);
        }

        outcome.map_err(|reason| GatewayError::TransferError {
            path: path.to_string(),
            reason,
        })
    }
}

/// Copy everything from `reader`, then flush and shut down `writer`. A failed
/// close fails the copy.
async fn copy_all<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(reader, writer)
        .await
        .map_err(|e| format!("copy failed: {}", e))?;
    writer
        .flush()
        .await
        .map_err(|e| format!("flush failed: {}", e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| format!("close failed: {}", e))?;
    Ok(copied)
}

#[async_trait]
impl RemoteSession for SshSession {
    fn label(&self) -> &str {
        &self.label
    }

    /// Execute a command with the command timeout.
    ///
    /// Collects stdout and extended data into one buffer in arrival order.
    /// A missing exit status is reported as -1. On timeout the partial output
    /// is carried in [`GatewayError::CommandTimeout`].
    async fn exec(&self, command: &str) -> Result<ExecOutput, GatewayError> {
        let channel_err = |reason: String| GatewayError::ChannelError {
            command: command.to_string(),
            reason,
        };

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| channel_err(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| channel_err(format!("Failed to execute command: {}", e)))?;

        let mut output = Vec::with_capacity(4096);
        let mut exit_code: Option<u32> = None;

        let result = tokio::time::timeout(self.settings.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        output.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // ext == 1 is stderr in SSH protocol
                        if ext == 1 {
                            output.extend_from_slice(&data);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) => {
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        let _ = channel.close().await;
        let raw = String::from_utf8_lossy(&output);

        if result.is_err() {
            warn!(
                "Command timed out after {:?} on {}: {}",
                self.settings.command_timeout, self.label, command
            );
            return Err(GatewayError::CommandTimeout {
                command: command.to_string(),
                timeout: self.settings.command_timeout,
                output: ExecOutput::from_raw(-1, &raw).lines,
            });
        }

        Ok(ExecOutput::from_raw(
            exit_code.map(|c| c as i32).unwrap_or(-1),
            &raw,
        ))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), GatewayError> {
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|_| GatewayError::SourceFileNotFound {
                path: local.display().to_string(),
            })?;

        self.with_sftp(remote, |sftp| async move {
            let mut file = sftp
                .open_with_flags(
                    remote,
                    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                )
                .await
                .map_err(|e| format!("open failed: {}", e))?;
            let bytes = copy_all(&mut source, &mut file).await?;
            debug!("uploaded {} bytes to {}", bytes, remote);
            Ok(())
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), GatewayError> {
        self.with_sftp(remote, |sftp| async move {
            let mut file = sftp
                .open(remote)
                .await
                .map_err(|e| format!("open failed: {}", e))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .await
                .map_err(|e| format!("read failed: {}", e))?;
            tokio::fs::write(local, &buf)
                .await
                .map_err(|e| format!("write to {} failed: {}", local.display(), e))?;
            debug!("downloaded {} bytes from {}", buf.len(), remote);
            Ok(())
        })
        .await
    }

    /// Open a `direct-tcpip` channel to `hostname:port` and run a second SSH
    /// handshake over it.
    async fn dial_through(
        &self,
        hostname: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, GatewayError> {
        let endpoint = format!("{}:{}", hostname, credentials.port);
        info!("Opening tunnel from {} to {}", self.label, endpoint);

        let channel = self
            .handle
            .channel_open_direct_tcpip(hostname, credentials.port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| classify_connect_error(&endpoint, &e.to_string()))?;

        let config = build_client_config(self.settings.command_timeout);
        let handler = SshClientHandler::new(hostname, credentials.port, self.policy.clone());

        let mut handle = tokio::time::timeout(
            self.settings.connect_timeout,
            client::connect_stream(config, channel.into_stream(), handler),
        )
        .await
        .map_err(|_| GatewayError::ConnectTimeout {
            host: endpoint.clone(),
            reason: format!(
                "Tunneled handshake timed out after {:?}",
                self.settings.connect_timeout
            ),
        })?
        .map_err(|e| classify_connect_error(&endpoint, &e.to_string()))?;

        authenticate(&mut handle, &endpoint, credentials).await?;
        info!("SSH connection established to {} through {}", endpoint, self.label);

        Ok(Box::new(SshSession {
            handle,
            label: format!("{}@{}", credentials.username, endpoint),
            settings: self.settings.clone(),
            policy: self.policy.clone(),
        }))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "job finished", "en")
            .await
            .map_err(|e| GatewayError::Transport(format!("disconnect from {}: {}", self.label, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod client_config {
        use super::*;

        #[test]
        fn test_inactivity_timeout() {
            let config = build_client_config(Duration::from_secs(42));
            assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(42)));
        }

        #[test]
        fn test_keepalive_settings() {
            let config = build_client_config(Duration::from_secs(30));
            assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
            assert_eq!(config.keepalive_max, 3);
        }
    }

    mod copy {
        use super::*;
        use std::io;
        use std::pin::Pin;
        use std::task::{Context, Poll};

        /// Accepts writes, then fails on close.
        #[derive(Default)]
        struct FailingClose {
            written: Vec<u8>,
        }

        impl AsyncWrite for FailingClose {
            fn poll_write(
                mut self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<io::Result<usize>> {
                self.written.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }

            fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
                Poll::Ready(Ok(()))
            }

            fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::other("handle already closed")))
            }
        }

        #[tokio::test]
        async fn test_copy_closes_writer() {
            let mut reader: &[u8] = b"payload";
            let mut writer = Vec::new();
            assert_eq!(copy_all(&mut reader, &mut writer).await.unwrap(), 7);
            assert_eq!(writer, b"payload");
        }

        #[tokio::test]
        async fn test_failed_close_fails_copy() {
            let mut reader: &[u8] = b"payload";
            let mut writer = FailingClose::default();
            let err = copy_all(&mut reader, &mut writer).await.unwrap_err();
            assert!(err.starts_with("close failed"), "{err}");
            assert_eq!(writer.written, b"payload");
        }
    }

    mod dialer {
        use super::*;

        #[test]
        fn test_dialer_picks_known_hosts_policy() {
            let settings = SshSettings {
                known_hosts: Some("/tmp/known".into()),
                ..Default::default()
            };
            let dialer = SshDialer::new(settings);
            assert!(matches!(dialer.policy, HostKeyPolicy::KnownHosts(_)));
        }

        #[test]
        fn test_dialer_defaults_to_accept_all() {
            let dialer = SshDialer::new(SshSettings::default());
            assert!(matches!(dialer.policy, HostKeyPolicy::AcceptAll));
        }

        #[tokio::test]
        async fn test_unreachable_host_is_classified() {
            // Port 1 on loopback is closed on any sane test host.
            let settings = SshSettings {
                connect_timeout: Duration::from_secs(5),
                ..Default::default()
            };
            let creds = Credentials::new("127.0.0.1", "u", "p").with_port(1);
            let err = SshDialer::new(settings).dial(&creds).await.err().unwrap();
            assert!(
                matches!(
                    err.kind(),
                    "ConnectTimeout" | "ProtocolError"
                ),
                "unexpected kind {}",
                err.kind()
            );
        }
    }
}
