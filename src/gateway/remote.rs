//! Client library for the gateway's WebSocket protocol.
//!
//! [`GatewayClient`] sends one message at a time and waits for its `reply`
//! frame, keeping any `server_log` frames that arrive in between. The wait is
//! bounded by the reply timeout.
//!
//! # Example
//!
//! ```ignore
//! let mut client = GatewayClient::connect("ws://127.0.0.1:5000/", Duration::from_secs(30)).await?;
//! client.set_target(&Credentials::new("10.0.0.1", "root", "secret")).await?;
//! let uptime = client.invoke("show_uptime", Vec::new()).await?;
//! ```

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::error::GatewayError;
use super::types::{Ack, ClientMessage, Credentials, InitParams, ServerFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One connected client session.
pub struct GatewayClient {
    socket: Socket,
    reply_timeout: Duration,
    log: Vec<String>,
}

impl GatewayClient {
    pub async fn connect(url: &str, reply_timeout: Duration) -> Result<Self, GatewayError> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::Transport(format!("connect to {url}: {e}")))?;
        debug!("connected to gateway at {}", url);
        Ok(Self {
            socket,
            reply_timeout,
            log: Vec::new(),
        })
    }

    /// Names of the jobs the gateway can run.
    pub async fn list_jobs(&mut self) -> Result<Vec<String>, GatewayError> {
        let reply = self.request(&ClientMessage::list_jobs()).await?;
        serde_json::from_value(reply)
            .map_err(|e| GatewayError::Transport(format!("unexpected job list: {e}")))
    }

    /// Set this session's remote target.
    pub async fn set_target(&mut self, target: &Credentials) -> Result<Ack, GatewayError> {
        let message = ClientMessage::connection_init(&InitParams::from(target));
        let reply = self.request(&message).await?;
        serde_json::from_value(reply)
            .map_err(|e| GatewayError::Transport(format!("unexpected init reply: {e}")))
    }

    /// Run a job with positional arguments and return its raw result.
    pub async fn invoke(&mut self, job: &str, args: Vec<Value>) -> Result<Value, GatewayError> {
        self.request(&ClientMessage::run_job(job, args)).await
    }

    /// Log lines received so far.
    pub fn server_log(&self) -> &[String] {
        &self.log
    }

    pub async fn close(mut self) -> Result<(), GatewayError> {
        self.socket
            .close(None)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn request(&mut self, message: &ClientMessage) -> Result<Value, GatewayError> {
        let text = serde_json::to_string(message)
            .map_err(|e| GatewayError::Transport(format!("encode message: {e}")))?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let timeout = self.reply_timeout;
        tokio::time::timeout(timeout, self.next_reply())
            .await
            .map_err(|_| GatewayError::ReplyTimeout(timeout))?
    }

    async fn next_reply(&mut self) -> Result<Value, GatewayError> {
        while let Some(message) = self.socket.next().await {
            let message = message.map_err(|e| GatewayError::Transport(e.to_string()))?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::Reply(value)) => return Ok(value),
                Ok(ServerFrame::ServerLog(line)) => self.log.push(line),
                Err(e) => debug!("ignoring unexpected frame: {}", e),
            }
        }
        Err(GatewayError::Transport("gateway closed the connection".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use poem::listener::TcpAcceptor;
    use serde_json::json;

    use super::*;
    use crate::gateway::connection::fakes::FakeDialer;
    use crate::gateway::jobs::JobRegistry;
    use crate::gateway::logging::{BroadcastSink, LogSink};
    use crate::gateway::router::DispatchRouter;
    use crate::gateway::storage::{DashMapSessionRegistry, SessionRegistry};
    use crate::gateway::transport::{GatewayState, serve_with};
    use crate::gateway::types::LOG_EVENT;

    struct Harness {
        url: String,
        registry: Arc<DashMapSessionRegistry>,
        logs: BroadcastSink,
    }

    async fn start(dialer: FakeDialer) -> Harness {
        let registry = Arc::new(DashMapSessionRegistry::new());
        let router = Arc::new(DispatchRouter::new(
            registry.clone(),
            JobRegistry::builtin(),
            Arc::new(dialer),
            "/tmp",
        ));
        let logs = BroadcastSink::new();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TcpAcceptor::from_tokio(listener).unwrap();
        tokio::spawn(serve_with(acceptor, GatewayState::new(router, logs.clone())));

        Harness {
            url: format!("ws://{addr}/"),
            registry,
            logs,
        }
    }

    async fn wait_until(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    mod round_trip {
        use super::*;

        #[tokio::test]
        async fn test_full_session() {
            let harness = start(FakeDialer::default()).await;
            let mut client = GatewayClient::connect(&harness.url, Duration::from_secs(5))
                .await
                .unwrap();

            let jobs = client.list_jobs().await.unwrap();
            assert!(jobs.contains(&"show_hostname".to_string()));

            let ack = client
                .set_target(&Credentials::new("h1", "u", "p"))
                .await
                .unwrap();
            assert!(ack.result);

            let value = client.invoke("show_hostname", Vec::new()).await.unwrap();
            assert_eq!(value, json!([0, ["h1"]]));

            client.close().await.unwrap();
            let registry = harness.registry.clone();
            assert!(wait_until(move || registry.is_empty()).await);
        }

        #[tokio::test]
        async fn test_conflict_between_clients() {
            let harness = start(FakeDialer::default()).await;
            let mut a = GatewayClient::connect(&harness.url, Duration::from_secs(5))
                .await
                .unwrap();
            let mut b = GatewayClient::connect(&harness.url, Duration::from_secs(5))
                .await
                .unwrap();

            assert!(a.set_target(&Credentials::new("h1", "u", "p")).await.unwrap().result);
            let ack = b.set_target(&Credentials::new("h1", "u", "p")).await.unwrap();
            assert!(!ack.result);
            assert_eq!(ack.error.unwrap().kind, "TargetConflict");

            let reply = b.invoke("show_uptime", Vec::new()).await.unwrap();
            assert_eq!(reply["error"]["kind"], json!("NoActiveTarget"));
        }

        #[tokio::test]
        async fn test_unknown_message_gets_null() {
            let harness = start(FakeDialer::default()).await;
            let mut client = GatewayClient::connect(&harness.url, Duration::from_secs(5))
                .await
                .unwrap();
            let reply = client
                .request(&ClientMessage {
                    kind: "bogus".into(),
                    job: String::new(),
                    func: None,
                    params: Value::Null,
                })
                .await
                .unwrap();
            assert_eq!(reply, Value::Null);
        }

        #[tokio::test]
        async fn test_server_log_collected() {
            let harness = start(FakeDialer::default()).await;
            let mut client = GatewayClient::connect(&harness.url, Duration::from_secs(5))
                .await
                .unwrap();
            // make sure the socket is subscribed before emitting
            client.list_jobs().await.unwrap();

            harness.logs.emit(LOG_EVENT, "[INFO] deploy started");
            client.list_jobs().await.unwrap();
            assert!(
                client
                    .server_log()
                    .contains(&"[INFO] deploy started".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = GatewayClient::connect(&format!("ws://{addr}/"), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "Transport");
    }
}
