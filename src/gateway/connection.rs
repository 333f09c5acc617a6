//! Per-job connection handler.
//!
//! A [`ConnectionHandler`] is opened from one session's credentials for one
//! job invocation and closed when the job returns. It owns the first-hop (HA)
//! connection and, when the session names a different hostname than the one
//! HA reports, a second connection to the real target tunneled through HA.
//!
//! ## Topology
//!
//! ```text
//! direct:  gateway ──ssh──> HA (target)
//! proxy:   gateway ──ssh──> HA ──direct-tcpip──> target
//! ```
//!
//! The SSH primitives sit behind the [`Dialer`] and [`RemoteSession`] traits so
//! the handler can be driven by fakes in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::error::GatewayError;
use super::types::{Credentials, ExecOutput};

/// One authenticated SSH connection.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// `user@host:port` used in logs and error context.
    fn label(&self) -> &str;

    /// Run a command and collect its merged output.
    async fn exec(&self, command: &str) -> Result<ExecOutput, GatewayError>;

    /// Copy a local file to `remote` over SFTP.
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), GatewayError>;

    /// Copy `remote` to a local file over SFTP.
    async fn download(&self, remote: &str, local: &Path) -> Result<(), GatewayError>;

    /// Open a second SSH connection to `hostname` through this one, using the
    /// port, user and secret in `credentials`.
    async fn dial_through(
        &self,
        hostname: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, GatewayError>;

    async fn close(&self) -> Result<(), GatewayError>;
}

/// Opens first-hop connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, credentials: &Credentials) -> Result<Box<dyn RemoteSession>, GatewayError>;
}

/// Live connection(s) for a single job.
pub struct ConnectionHandler {
    ha: Box<dyn RemoteSession>,
    target: Option<Box<dyn RemoteSession>>,
    workdir: PathBuf,
}

impl ConnectionHandler {
    /// Dial HA, probe its hostname and jump to the real target if needed.
    ///
    /// Either returns a ready handler or an error with every connection
    /// opened along the way already closed.
    pub async fn open(
        dialer: &dyn Dialer,
        credentials: &Credentials,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self, GatewayError> {
        let ha = dialer.dial(credentials).await?;

        let probe = match ha.exec("hostname").await {
            Ok(out) => out,
            Err(e) => {
                close_quietly(ha.as_ref()).await;
                return Err(e);
            }
        };
        let reported = probe.lines.first().map(|l| l.trim()).unwrap_or_default();

        let target = match credentials.hostname.as_deref() {
            Some(hostname) if hostname != reported => {
                info!(
                    "{} reports hostname {:?}, jumping to {}",
                    ha.label(),
                    reported,
                    hostname
                );
                match ha.dial_through(hostname, credentials).await {
                    Ok(session) => Some(session),
                    Err(e) => {
                        close_quietly(ha.as_ref()).await;
                        return Err(GatewayError::ProxyUnreachable {
                            hostname: hostname.to_string(),
                            via: credentials.address.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            _ => None,
        };

        Ok(Self {
            ha,
            target,
            workdir: workdir.into(),
        })
    }

    /// True when commands run on a target reached through HA.
    pub fn is_proxy(&self) -> bool {
        self.target.is_some()
    }

    fn active(&self) -> &dyn RemoteSession {
        self.target.as_deref().unwrap_or(self.ha.as_ref())
    }

    fn note_ha_is_target(&self) {
        if !self.is_proxy() {
            info!("no jump host in use, HA is the target");
        }
    }

    pub async fn exec(&self, command: &str) -> Result<ExecOutput, GatewayError> {
        run_logged(self.active(), command).await
    }

    pub async fn ha_exec(&self, command: &str) -> Result<ExecOutput, GatewayError> {
        self.note_ha_is_target();
        run_logged(self.ha.as_ref(), command).await
    }

    /// Upload `src` (relative to the working directory) into `dst_dir`.
    pub async fn send_file(&self, src: &str, dst_dir: &str) -> Result<String, GatewayError> {
        self.upload_via(self.active(), src, dst_dir).await
    }

    pub async fn ha_send_file(&self, src: &str, dst_dir: &str) -> Result<String, GatewayError> {
        self.note_ha_is_target();
        self.upload_via(self.ha.as_ref(), src, dst_dir).await
    }

    /// Download `src` into the working directory under its basename.
    pub async fn download_file(&self, src: &str) -> Result<PathBuf, GatewayError> {
        self.download_via(self.active(), src).await
    }

    pub async fn ha_download_file(&self, src: &str) -> Result<PathBuf, GatewayError> {
        self.note_ha_is_target();
        self.download_via(self.ha.as_ref(), src).await
    }

    async fn upload_via(
        &self,
        session: &dyn RemoteSession,
        src: &str,
        dst_dir: &str,
    ) -> Result<String, GatewayError> {
        let local = self.resolve_source(src)?;
        let name = Path::new(src)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| GatewayError::SourceFileNotFound {
                path: local.display().to_string(),
            })?;
        let remote = remote_join(dst_dir, name);

        session.upload(&local, &remote).await?;
        debug!("sent {} to {}:{}", local.display(), session.label(), remote);
        Ok(remote)
    }

    /// Resolve `src` against the working directory. Anything that is not a
    /// regular file inside it, after following `..` and symlinks, is reported
    /// as missing.
    fn resolve_source(&self, src: &str) -> Result<PathBuf, GatewayError> {
        let joined = self.workdir.join(src);
        let not_found = || GatewayError::SourceFileNotFound {
            path: joined.display().to_string(),
        };
        let root = self.workdir.canonicalize().map_err(|_| not_found())?;
        let resolved = joined.canonicalize().map_err(|_| not_found())?;
        if !resolved.starts_with(&root) || !resolved.is_file() {
            return Err(not_found());
        }
        Ok(resolved)
    }

    async fn download_via(
        &self,
        session: &dyn RemoteSession,
        src: &str,
    ) -> Result<PathBuf, GatewayError> {
        let name = remote_basename(src).ok_or_else(|| GatewayError::TransferError {
            path: src.to_string(),
            reason: "remote path has no file name".into(),
        })?;
        let local = self.workdir.join(name);

        session.download(src, &local).await?;
        debug!("fetched {}:{} to {}", session.label(), src, local.display());
        Ok(local)
    }

    /// Close the target connection (if any) and HA. Returns how many
    /// connections were closed.
    pub async fn close(self) -> usize {
        let mut closed = 0;
        if let Some(target) = &self.target {
            close_quietly(target.as_ref()).await;
            closed += 1;
        }
        close_quietly(self.ha.as_ref()).await;
        closed += 1;
        info!("SSH connections closed ({})", closed);
        closed
    }
}

async fn run_logged(session: &dyn RemoteSession, command: &str) -> Result<ExecOutput, GatewayError> {
    let out = session.exec(command).await?;
    if out.success() {
        debug!(
            "cmd: {}; rc: {}; out: {:?}",
            command, out.exit_code, out.lines
        );
    } else {
        debug!(
            "WARNING - rc not 0 >> cmd: {}; rc: {}; out: {:?}",
            command, out.exit_code, out.lines
        );
    }
    Ok(out)
}

async fn close_quietly(session: &dyn RemoteSession) {
    if let Err(e) = session.close().await {
        warn!("closing {} failed: {}", session.label(), e);
    }
}

/// Join a remote directory and a file name with `/`.
fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

fn remote_basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|n| !n.is_empty())
}
