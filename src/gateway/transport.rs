//! WebSocket transport.
//!
//! Every socket accepted on `/` becomes one session with a fresh UUID v4 id.
//! Inbound text frames are JSON messages for the [`DispatchRouter`]; each one
//! gets exactly one `reply` frame. Log lines from the [`BroadcastSink`] are
//! pushed to every socket as `server_log` frames, including while a job is
//! still running.
//!
//! A session-fatal router error closes the socket.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use poem::listener::{Acceptor, TcpListener};
use poem::middleware::Tracing;
use poem::web::Data;
use poem::web::websocket::{Message, WebSocket};
use poem::{Endpoint, EndpointExt, IntoResponse, Route, Server, get, handler};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use uuid::Uuid;

use super::error::GatewayError;
use super::logging::BroadcastSink;
use super::router::DispatchRouter;
use super::types::ServerFrame;

/// Replies queued per socket before the reader waits for the writer.
const OUTGOING_CAPACITY: usize = 32;

/// Shared state handed to every socket.
pub struct GatewayState {
    pub router: Arc<DispatchRouter>,
    pub logs: BroadcastSink,
}

impl GatewayState {
    pub fn new(router: Arc<DispatchRouter>, logs: BroadcastSink) -> Self {
        Self { router, logs }
    }
}

#[handler]
fn ws_endpoint(ws: WebSocket, Data(state): Data<&Arc<GatewayState>>) -> impl IntoResponse {
    let state = state.clone();
    ws.on_upgrade(move |socket| async move {
        let sid = Uuid::new_v4().to_string();
        let (mut sink, mut stream) = socket.split();

        if let Err(e) = state.router.on_connect(&sid) {
            error!(sid = sid.as_str(), "rejecting socket: {}", e);
            let _ = sink.send(Message::Close(None)).await;
            return;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTGOING_CAPACITY);
        let mut logs = state.logs.subscribe();

        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = out_rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                    line = logs.recv() => match line {
                        Ok(text) => ServerFrame::ServerLog(text),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        while let Some(Ok(message)) = stream.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let payload = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);

            match state.router.on_message(&sid, payload).await {
                Ok(reply) => {
                    let frame = ServerFrame::Reply(reply.unwrap_or(Value::Null));
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(sid = sid.as_str(), "closing session: {}", e);
                    break;
                }
            }
        }

        drop(out_tx);
        let _ = writer.await;
        state.router.on_disconnect(&sid);
    })
}

/// The HTTP application: the WebSocket endpoint at `/`.
pub fn app(state: GatewayState) -> impl Endpoint {
    Route::new()
        .at("/", get(ws_endpoint))
        .data(Arc::new(state))
        .with(Tracing)
}

/// Serve on an already bound acceptor.
pub async fn serve_with<A: Acceptor + 'static>(
    acceptor: A,
    state: GatewayState,
) -> Result<(), GatewayError> {
    Server::new_with_acceptor(acceptor)
        .name("SSH Gateway")
        .run(app(state))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

/// Bind `addr` and serve until the process stops.
pub async fn serve(addr: String, state: GatewayState) -> Result<(), GatewayError> {
    info!("Starting SSH gateway on {}", addr);
    Server::new(TcpListener::bind(addr))
        .name("SSH Gateway")
        .run(app(state))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}
