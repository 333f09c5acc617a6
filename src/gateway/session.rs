//! russh client handler with host key policy.
//!
//! - `SshClientHandler` accepts every host key by default (similar to
//!   `StrictHostKeyChecking=no` in OpenSSH). When a known_hosts file is
//!   configured, keys are checked against it and unknown or changed keys are
//!   rejected, which surfaces as a host key error from the handshake.

use std::path::PathBuf;

use russh::{client, keys};
use tracing::{debug, warn};

/// How server host keys are verified.
#[derive(Debug, Clone, Default)]
pub enum HostKeyPolicy {
    /// Accept all host keys.
    #[default]
    AcceptAll,
    /// Accept only keys recorded in this known_hosts file.
    KnownHosts(PathBuf),
}

impl HostKeyPolicy {
    pub fn from_known_hosts(path: Option<PathBuf>) -> Self {
        path.map(Self::KnownHosts).unwrap_or_default()
    }
}

/// Client handler for russh.
pub struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAll => Ok(true),
            HostKeyPolicy::KnownHosts(path) => {
                match keys::check_known_hosts_path(&self.host, self.port, server_public_key, path)
                {
                    Ok(true) => {
                        debug!("Host key for {}:{} verified", self.host, self.port);
                        Ok(true)
                    }
                    Ok(false) => {
                        warn!(
                            "Host key for {}:{} not found in {}",
                            self.host,
                            self.port,
                            path.display()
                        );
                        Ok(false)
                    }
                    Err(e) => {
                        warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                        Ok(false)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_accepts_all() {
        assert!(matches!(HostKeyPolicy::default(), HostKeyPolicy::AcceptAll));
        assert!(matches!(
            HostKeyPolicy::from_known_hosts(None),
            HostKeyPolicy::AcceptAll
        ));
    }

    #[test]
    fn test_known_hosts_policy() {
        let policy = HostKeyPolicy::from_known_hosts(Some(PathBuf::from("/etc/ssh/known")));
        match policy {
            HostKeyPolicy::KnownHosts(path) => assert_eq!(path, PathBuf::from("/etc/ssh/known")),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn test_handler_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SshClientHandler>();
    }

    mod known_hosts {
        use super::*;
        use russh::client::Handler;
        use russh::keys::ssh_key::Algorithm;
        use russh::keys::ssh_key::rand_core::OsRng;

        fn random_key() -> keys::PublicKey {
            keys::PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
                .unwrap()
                .public_key()
                .clone()
        }

        fn handler(path: PathBuf) -> SshClientHandler {
            SshClientHandler::new("10.0.0.1", 22, HostKeyPolicy::KnownHosts(path))
        }

        fn write_known_hosts(dir: &tempfile::TempDir, key: &keys::PublicKey) -> PathBuf {
            let path = dir.path().join("known_hosts");
            let line = format!("10.0.0.1 {}\n", key.to_openssh().unwrap());
            std::fs::write(&path, line).unwrap();
            path
        }

        #[tokio::test]
        async fn test_recorded_key_accepted() {
            let dir = tempfile::tempdir().unwrap();
            let key = random_key();
            let path = write_known_hosts(&dir, &key);
            assert!(handler(path).check_server_key(&key).await.unwrap());
        }

        #[tokio::test]
        async fn test_changed_key_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_known_hosts(&dir, &random_key());
            assert!(!handler(path).check_server_key(&random_key()).await.unwrap());
        }

        #[tokio::test]
        async fn test_unknown_host_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let key = random_key();
            let path = write_known_hosts(&dir, &key);
            let mut other = SshClientHandler::new("10.0.0.2", 22, HostKeyPolicy::KnownHosts(path));
            assert!(!other.check_server_key(&key).await.unwrap());
        }

        #[tokio::test]
        async fn test_missing_file_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("absent");
            assert!(!handler(path).check_server_key(&random_key()).await.unwrap());
        }

        #[tokio::test]
        async fn test_accept_all_ignores_file() {
            let mut handler = SshClientHandler::new("10.0.0.1", 22, HostKeyPolicy::AcceptAll);
            assert!(handler.check_server_key(&random_key()).await.unwrap());
        }
    }
}
