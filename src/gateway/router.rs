//! Per-session protocol state machine.
//!
//! The transport calls [`DispatchRouter::on_connect`], then
//! [`DispatchRouter::on_message`] for every inbound frame and finally
//! [`DispatchRouter::on_disconnect`]. A session is `CONNECTED` while its
//! record is empty and `TARGET_SET` once a claim succeeds; it only returns to
//! `CONNECTED` through a conflict reset or disconnect.
//!
//! `on_message` only returns `Err` for session-fatal registry errors. Every
//! other failure becomes a structured failure reply and the session stays up.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandler, Dialer};
use super::error::GatewayError;
use super::jobs::JobRegistry;
use super::storage::{ClaimOutcome, SessionRegistry};
use super::types::{
    Ack, ClientMessage, InitParams, JOB_CONNECTION_INIT, JOB_GROUP_SSH, JOB_LIST_COMMANDS,
    TYPE_MODULE, TYPE_SYSTEM,
};

/// Routes client messages to the registry, jobs and connection handlers.
pub struct DispatchRouter {
    registry: Arc<dyn SessionRegistry>,
    jobs: JobRegistry,
    dialer: Arc<dyn Dialer>,
    workdir: PathBuf,
}

impl DispatchRouter {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        jobs: JobRegistry,
        dialer: Arc<dyn Dialer>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            jobs,
            dialer,
            workdir: workdir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    pub fn on_connect(&self, sid: &str) -> Result<(), GatewayError> {
        self.registry.create(sid)?;
        info!(sid, "client connected ({} active)", self.registry.len());
        Ok(())
    }

    pub fn on_disconnect(&self, sid: &str) {
        match self.registry.evict(sid) {
            Some(snapshot) => info!(
                sid,
                "client disconnected (target: {}, connected at {})",
                snapshot.target.as_deref().unwrap_or("none"),
                snapshot.connected_at
            ),
            None => debug!(sid, "disconnect for unknown session"),
        }
        for session in self.registry.list() {
            debug!(
                "still connected: {} since {} (target: {})",
                session.session_id,
                session.connected_at,
                session.target.as_deref().unwrap_or("none")
            );
        }
    }

    /// Handle one inbound payload and produce the reply.
    ///
    /// `Ok(None)` is the `null` reply for anything unrecognized.
    pub async fn on_message(&self, sid: &str, payload: Value) -> Result<Option<Value>, GatewayError> {
        if !payload.is_object() {
            warn!(sid, "ignoring non-object payload");
            return Ok(None);
        }
        let message: ClientMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(sid, "ignoring malformed message: {}", e);
                return Ok(None);
            }
        };

        match (message.kind.as_str(), message.job.as_str()) {
            (TYPE_SYSTEM, JOB_LIST_COMMANDS) => {
                self.registry.lookup(sid)?;
                Ok(Some(Value::from(self.jobs.names())))
            }
            (TYPE_SYSTEM, JOB_CONNECTION_INIT) => self.set_target(sid, message.params).map(Some),
            (TYPE_MODULE, JOB_GROUP_SSH) => self.run_job(sid, &message).await.map(Some),
            (kind, job) => {
                warn!(sid, "unknown message type {:?} / job {:?}", kind, job);
                Ok(None)
            }
        }
    }

    fn set_target(&self, sid: &str, params: Value) -> Result<Value, GatewayError> {
        let credentials = match serde_json::from_value::<InitParams>(params)
            .map_err(|e| GatewayError::InvalidParams(e.to_string()))
            .and_then(InitParams::into_credentials)
        {
            Ok(credentials) => credentials,
            Err(e) => {
                self.registry.lookup(sid)?;
                warn!(sid, "rejected target: {}", e);
                return Ok(Ack::failed(&e).to_value());
            }
        };
        let address = credentials.address.clone();

        match self.registry.claim(sid, credentials)? {
            ClaimOutcome::Claimed => {
                info!(sid, "target set to {}", address);
                Ok(Ack::ok().to_value())
            }
            ClaimOutcome::AlreadyHeld => {
                debug!(sid, "target {} already held", address);
                Ok(Ack::ok().to_value())
            }
            ClaimOutcome::Conflict { holder } => {
                warn!(sid, "target {} is held by session {}; record reset", address, holder);
                Ok(Ack::failed(&GatewayError::TargetConflict { address }).to_value())
            }
        }
    }

    async fn run_job(&self, sid: &str, message: &ClientMessage) -> Result<Value, GatewayError> {
        let record = self.registry.lookup(sid)?;
        let Some(credentials) = record.credentials() else {
            return Ok(Ack::failed(&GatewayError::NoActiveTarget).to_value());
        };

        let name = message.func.as_deref().unwrap_or_default();
        let Some(job) = self.jobs.get(name) else {
            warn!(sid, "job not found: {:?}", name);
            return Ok(Ack::failed(&GatewayError::JobNotFound(name.to_string())).to_value());
        };

        info!(sid, "running job {} on {}", name, credentials.endpoint());
        let opened =
            ConnectionHandler::open(self.dialer.as_ref(), credentials, self.workdir.clone()).await;
        let handler = match opened {
            Ok(handler) => handler,
            Err(e) => {
                warn!(sid, "connection to {} failed: {}", credentials.endpoint(), e);
                return Ok(Ack::failed(&e).to_value());
            }
        };

        let result = job(&handler, message.positional_args()).await;
        handler.close().await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(sid, "job {} failed: {}", name, e);
                Ok(Ack::failed(&e).to_value())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::connection::fakes::FakeDialer;
    use crate::gateway::storage::DashMapSessionRegistry;
    use serde_json::json;

    fn router(dialer: &FakeDialer) -> DispatchRouter {
        DispatchRouter::new(
            Arc::new(DashMapSessionRegistry::new()),
            JobRegistry::builtin(),
            Arc::new(dialer.clone()),
            "/tmp",
        )
    }

    fn init(address: &str) -> Value {
        json!({
            "type": "system",
            "job": "ssh_connection_init",
            "params": {"ssh_ip": address, "ssh_user": "u", "ssh_pass": "p"}
        })
    }

    fn job(name: &str) -> Value {
        json!({"type": "module", "job": "ssh", "func": name, "params": []})
    }

    mod system {
        use super::*;

        #[tokio::test]
        async fn test_list_jobs() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            let reply = router
                .on_message("s1", json!({"type": "system", "job": "get_server_command_list"}))
                .await
                .unwrap()
                .unwrap();
            let names: Vec<String> = serde_json::from_value(reply).unwrap();
            assert!(names.contains(&"show_uptime".to_string()));
            assert_eq!(dialer.journal().dials, 0);
        }

        #[tokio::test]
        async fn test_set_target_ack() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            let reply = router.on_message("s1", init("h1")).await.unwrap();
            assert_eq!(reply, Some(json!({"result": true})));
            assert_eq!(router.registry().holder_of("h1").as_deref(), Some("s1"));
        }

        #[tokio::test]
        async fn test_self_reclaim_is_ack() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            router.on_message("s1", init("h1")).await.unwrap();
            let reply = router.on_message("s1", init("h1")).await.unwrap();
            assert_eq!(reply, Some(json!({"result": true})));
            assert!(!router.registry().lookup("s1").unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_invalid_params_keep_session() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            let reply = router
                .on_message(
                    "s1",
                    json!({"type": "system", "job": "ssh_connection_init", "params": {"ssh_ip": "h1"}}),
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply["result"], json!(false));
            assert_eq!(reply["error"]["kind"], json!("InvalidParams"));
            assert!(router.registry().lookup("s1").unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_unknown_session_is_fatal() {
            let router = router(&FakeDialer::default());
            let err = router.on_message("ghost", init("h1")).await.unwrap_err();
            assert!(err.is_session_fatal());
        }
    }

    mod unrecognized {
        use super::*;

        #[tokio::test]
        async fn test_unknown_type_is_null() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            let reply = router
                .on_message("s1", json!({"type": "bogus", "job": "x"}))
                .await
                .unwrap();
            assert_eq!(reply, None);
        }

        #[tokio::test]
        async fn test_unknown_job_group_is_null() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            let reply = router
                .on_message("s1", json!({"type": "module", "job": "ftp", "func": "x"}))
                .await
                .unwrap();
            assert_eq!(reply, None);
        }

        #[tokio::test]
        async fn test_non_object_is_null() {
            let router = router(&FakeDialer::default());
            router.on_connect("s1").unwrap();
            assert_eq!(router.on_message("s1", json!([1, 2])).await.unwrap(), None);
            assert_eq!(router.on_message("s1", json!("hello")).await.unwrap(), None);
        }
    }

    mod module {
        use super::*;

        #[tokio::test]
        async fn test_no_target_never_dials() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            let reply = router
                .on_message("s1", job("show_hostname"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply["error"]["kind"], json!("NoActiveTarget"));
            assert_eq!(dialer.journal().dials, 0);
        }

        #[tokio::test]
        async fn test_no_target_wins_over_unknown_job() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            let reply = router.on_message("s1", job("reboot")).await.unwrap().unwrap();
            assert_eq!(reply["error"]["kind"], json!("NoActiveTarget"));
        }

        #[tokio::test]
        async fn test_unknown_job_never_dials() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            router.on_message("s1", init("h1")).await.unwrap();
            let reply = router.on_message("s1", job("reboot")).await.unwrap().unwrap();
            assert_eq!(reply["error"]["kind"], json!("JobNotFound"));
            assert_eq!(dialer.journal().dials, 0);
        }

        #[tokio::test]
        async fn test_dial_failure_is_structured() {
            let dialer = FakeDialer {
                fail_dial: Some("Permission denied".into()),
                ..Default::default()
            };
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            router.on_message("s1", init("h1")).await.unwrap();
            let reply = router
                .on_message("s1", job("show_uptime"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply["result"], json!(false));
            assert_eq!(reply["error"]["kind"], json!("AuthenticationFailed"));
        }

        #[tokio::test]
        async fn test_job_failure_still_closes_handler() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            router.on_message("s1", init("h1")).await.unwrap();
            let reply = router
                .on_message("s1", job("run_command"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply["error"]["kind"], json!("InvalidParams"));
            assert_eq!(dialer.journal().closed, vec!["h1".to_string()]);
        }

        #[tokio::test]
        async fn test_transfer_failure_keeps_target() {
            let dialer = FakeDialer {
                fail_transfer: true,
                ..FakeDialer::default()
            };
            let router = router(&dialer);
            router.on_connect("s1").unwrap();
            router.on_message("s1", init("h1")).await.unwrap();

            let reply = router
                .on_message(
                    "s1",
                    json!({"type": "module", "job": "ssh", "func": "download_file", "params": ["/var/log/app.log"]}),
                )
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply["result"], json!(false));
            assert_eq!(reply["error"]["kind"], json!("TransferError"));

            {
                let journal = dialer.journal();
                assert_eq!(journal.closed, vec!["h1".to_string()]);
                assert_eq!(journal.sftp_opened, journal.sftp_closed);
            }
            assert_eq!(router.registry().holder_of("h1").as_deref(), Some("s1"));
            assert!(!router.registry().lookup("s1").unwrap().is_empty());
        }
    }

    mod scenario {
        use super::*;

        #[tokio::test]
        async fn test_conflict_then_show_hostname() {
            let dialer = FakeDialer::default();
            let router = router(&dialer);
            router.on_connect("A").unwrap();
            router.on_connect("B").unwrap();

            let a = router.on_message("A", init("h1")).await.unwrap();
            assert_eq!(a, Some(json!({"result": true})));

            let b = router.on_message("B", init("h1")).await.unwrap().unwrap();
            assert_eq!(b["result"], json!(false));
            assert_eq!(b["error"]["kind"], json!("TargetConflict"));
            assert!(router.registry().lookup("B").unwrap().is_empty());

            let reply = router
                .on_message("A", job("show-hostname"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply, json!([0, ["h1"]]));

            router.on_disconnect("A");
            router.on_disconnect("B");
            assert!(router.registry().is_empty());
        }

        #[tokio::test]
        async fn test_disconnect_frees_target() {
            let router = router(&FakeDialer::default());
            router.on_connect("A").unwrap();
            router.on_connect("B").unwrap();
            router.on_message("A", init("h1")).await.unwrap();
            router.on_disconnect("A");

            let reply = router.on_message("B", init("h1")).await.unwrap();
            assert_eq!(reply, Some(json!({"result": true})));
        }

        #[tokio::test]
        async fn test_disconnect_logs_remaining_sessions() {
            use crate::gateway::logging::{BufferSink, SinkLayer};
            use tracing_subscriber::layer::SubscriberExt;

            let router = router(&FakeDialer::default());
            router.on_connect("A").unwrap();
            router.on_connect("B").unwrap();
            router.on_message("B", init("h2")).await.unwrap();

            let sink = BufferSink::new();
            let subscriber = tracing_subscriber::registry().with(SinkLayer::new(sink.clone()));
            tracing::subscriber::with_default(subscriber, || router.on_disconnect("A"));

            let lines = sink.lines();
            assert!(
                lines
                    .iter()
                    .any(|l| l.starts_with("[INFO] [A] client disconnected (target: none, connected at "))
            );
            assert!(
                lines
                    .iter()
                    .any(|l| l.starts_with("[DEBUG] still connected: B since ") && l.ends_with("(target: h2)"))
            );
        }
    }
}
