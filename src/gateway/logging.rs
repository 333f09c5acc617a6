//! Log forwarding to connected clients.
//!
//! [`SinkLayer`] is a tracing `Layer` that formats each event as
//! `[LEVEL] [sid] message` and hands it to a [`LogSink`]. The server installs
//! it with a [`BroadcastSink`] so every socket receives every log line; tests
//! use [`BufferSink`].
//!
//! `emit` runs inside `on_event`, which is synchronous, so sinks must never
//! block or log themselves.

use std::fmt::{self, Write};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::error::GatewayError;
use super::types::LOG_EVENT;

/// Lines buffered per subscriber before slow sockets start missing lines.
const BROADCAST_CAPACITY: usize = 1024;

/// Destination for out-of-band events.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &str, text: &str);
}

/// Fans lines out to every subscribed socket.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for BroadcastSink {
    fn emit(&self, event: &str, text: &str) {
        if event == LOG_EVENT {
            // No receivers is fine: nobody is connected.
            let _ = self.tx.send(text.to_string());
        }
    }
}

/// Keeps `(event, text)` pairs in memory.
#[derive(Clone, Default)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<(String, String)>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().map(|(_, text)| text.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(_, text)| text.clone())
                .collect(),
        }
    }
}

impl LogSink for BufferSink {
    fn emit(&self, event: &str, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((event.to_string(), text.to_string()));
        }
    }
}

/// Drops everything.
#[derive(Clone, Copy, Default)]
pub struct DiscardSink;

impl LogSink for DiscardSink {
    fn emit(&self, _event: &str, _text: &str) {}
}

/// Tracing layer forwarding formatted events to a [`LogSink`].
pub struct SinkLayer<K> {
    sink: K,
}

impl<K: LogSink> SinkLayer<K> {
    pub fn new(sink: K) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber, K: LogSink + 'static> Layer<S> for SinkLayer<K> {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = visitor.render(event.metadata().level().as_str());
        self.sink.emit(LOG_EVENT, &line);
    }
}

/// Collects the message, the `sid` field and any other fields of one event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    sid: Option<String>,
    extra: String,
}

impl MessageVisitor {
    fn render(self, level: &str) -> String {
        let mut line = format!("[{}] ", level);
        if let Some(sid) = self.sid {
            let _ = write!(line, "[{}] ", sid);
        }
        line.push_str(&self.message);
        if !self.extra.is_empty() {
            line.push(' ');
            line.push_str(&self.extra);
        }
        line
    }

    fn push_extra(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if !self.extra.is_empty() {
            self.extra.push_str(", ");
        }
        let _ = write!(self.extra, "{}={}", field.name(), value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "sid" => self.sid = Some(value.to_string()),
            _ => self.push_extra(field, format_args!("{}", value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "sid" => self.sid = Some(format!("{:?}", value).trim_matches('"').to_string()),
            _ => self.push_extra(field, format_args!("{:?}", value)),
        }
    }
}

/// Build the process filter: `RUST_LOG` plus `info`, with russh kept at `warn`.
pub fn env_filter() -> Result<EnvFilter, GatewayError> {
    let directive = |d: &str| {
        d.parse::<tracing_subscriber::filter::Directive>()
            .map_err(|e| GatewayError::Config(format!("invalid log directive {d:?}: {e}")))
    };
    Ok(EnvFilter::from_default_env()
        .add_directive(directive("info")?)
        .add_directive(directive("russh=warn")?))
}

/// Install the global subscriber: stdout formatting plus forwarding to `sink`.
pub fn init_logging<K: LogSink + 'static>(sink: K) -> Result<(), GatewayError> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(tracing_subscriber::fmt::layer())
        .with(SinkLayer::new(sink))
        .try_init()
        .map_err(|e| GatewayError::Config(format!("logging already initialized: {e}")))
}
