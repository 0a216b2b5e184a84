//! Single relay session.
//!
//! A [`RelaySession`] owns at most one WebSocket at a time. The socket is split
//! into a writer task fed by an unbounded channel (so sending never awaits) and
//! a reader task that decodes frames in delivery order and hands them to the
//! [`Multiplexer`]. When the reader sees the socket close, every pending request
//! fails with [`ClientError::ConnectionClosed`] and every subscription is
//! dropped.
//!
//! Each connection attempt gets a new epoch. Teardown is keyed by epoch, so a
//! reader from an old connection can never reset a newer one.

use crate::config::SessionConfig;
use crate::diagnostics::DiagnosticLog;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, FrameKind, RelayMessage};
use crate::multiplexer::Multiplexer;
use crate::relay_url::normalize_relay_url;
use crate::subscription::{Subscription, generate_subscription_id};
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nostr::{Event, KIND_SHORT_TEXT_NOTE};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOURCE: &str = "relay";

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Connection state plus the epoch of the attempt it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub epoch: u64,
}

/// Relay acceptance of a published event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    pub event_id: String,
    /// Message from the relay, usually empty on success
    pub message: String,
}

struct Connection {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    connected_at: Instant,
    connected_since: DateTime<Utc>,
}

struct Shared {
    config: SessionConfig,
    mux: Multiplexer,
    status: watch::Sender<SessionStatus>,
    connection: Mutex<Option<Connection>>,
    url: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    diagnostics: DiagnosticLog,
}

impl Shared {
    fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    fn set_state_if(&self, epoch: u64, from: &[SessionState], to: SessionState) -> bool {
        self.status.send_if_modified(|status| {
            if status.epoch == epoch && from.contains(&status.state) && status.state != to {
                status.state = to;
                true
            } else {
                false
            }
        })
    }

    fn record_error(&self, message: String) {
        warn!("{}", message);
        self.diagnostics.error(message.clone(), Some(SOURCE));
        *self.last_error.lock() = Some(message);
    }

    /// Tear down the connection for `epoch`, if it is still the current one.
    fn teardown(&self, epoch: u64) {
        let changed = {
            let mut slot = self.connection.lock();
            let current = match slot.as_ref() {
                Some(conn) if conn.epoch == epoch => slot.take(),
                _ => None,
            };

            if let Some(conn) = current {
                let _ = conn.outbound.send(Message::Close(None));
                conn.reader.abort();
                let discarded = self.mux.close_all();
                debug!("Discarded {} pending handlers", discarded);
            }

            self.set_state_if(
                epoch,
                &[SessionState::Connecting, SessionState::Connected, SessionState::Closing],
                SessionState::Disconnected,
            )
        };

        if changed {
            info!("Relay session {} disconnected", epoch);
            self.diagnostics.info("Disconnected from relay", Some(SOURCE));
        }
    }

    fn handle_text(&self, text: &str) {
        let msg = RelayMessage::decode(text);
        match &msg {
            RelayMessage::Notice { message } => {
                info!("Relay notice: {}", message);
                self.diagnostics.info(format!("NOTICE: {}", message), Some(SOURCE));
            }
            RelayMessage::Unrecognized { reason, .. } => {
                debug!("Ignoring unrecognized frame: {}", reason);
            }
            _ => {
                if !self.mux.dispatch(&msg) {
                    debug!("Unhandled {:?} frame", msg.kind());
                }
            }
        }
    }
}

// Resets the state if a connect future is dropped before it finishes.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    epoch: u64,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.teardown(self.epoch);
        }
    }
}

/// A session with one relay.
///
/// Share it with `Arc<RelaySession>`. Dropping it disconnects.
pub struct RelaySession {
    shared: Arc<Shared>,
}

impl RelaySession {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Disconnected,
            epoch: 0,
        });
        let diagnostics = DiagnosticLog::new(config.log_capacity);

        Self {
            shared: Arc::new(Shared {
                config,
                mux: Multiplexer::new(),
                status,
                connection: Mutex::new(None),
                url: Mutex::new(None),
                last_error: Mutex::new(None),
                diagnostics,
            }),
        }
    }

    /// Connect to a relay, replacing any existing connection.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let url = normalize_relay_url(url)?;
        self.disconnect();

        let shared = &*self.shared;
        let mut epoch = 0;
        shared.status.send_modify(|status| {
            status.epoch += 1;
            status.state = SessionState::Connecting;
            epoch = status.epoch;
        });
        *shared.url.lock() = Some(url.clone());
        *shared.last_error.lock() = None;

        let mut guard = AttemptGuard {
            shared,
            epoch,
            armed: true,
        };

        info!("Connecting to relay: {}", url);
        shared
            .diagnostics
            .info(format!("Connecting to {}", url), Some(SOURCE));

        let connect_start = Instant::now();
        let connect_timeout = shared.config.connect_timeout();
        let ws = match timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                let err = ClientError::from(e);
                shared.record_error(format!("Failed to connect to {}: {}", url, err));
                return Err(err);
            }
            Err(_) => {
                let err = ClientError::ConnectionTimeout(connect_timeout);
                shared.record_error(format!("Failed to connect to {}: {}", url, err));
                return Err(err);
            }
        };

        {
            let mut slot = shared.connection.lock();
            let status = shared.status();
            if status.epoch != epoch || status.state != SessionState::Connecting {
                debug!("Connection attempt {} superseded", epoch);
                guard.armed = false;
                return Err(ClientError::ConnectionClosed);
            }

            let (sink, stream) = ws.split();
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            tokio::spawn(write_loop(sink, outbound_rx));
            let reader = tokio::spawn(read_loop(Arc::clone(&self.shared), stream, epoch));

            *slot = Some(Connection {
                epoch,
                outbound,
                reader,
                connected_at: Instant::now(),
                connected_since: Utc::now(),
            });
            shared.set_state_if(epoch, &[SessionState::Connecting], SessionState::Connected);
            guard.armed = false;
        }

        info!(
            "Connected to relay: {} (took {:?})",
            url,
            connect_start.elapsed()
        );
        shared
            .diagnostics
            .info(format!("Connected to {}", url), Some(SOURCE));
        Ok(())
    }

    /// Close the socket and drop all correlation state. No-op when idle.
    pub fn disconnect(&self) {
        let status = self.shared.status();
        if status.state == SessionState::Disconnected {
            return;
        }

        self.shared.set_state_if(
            status.epoch,
            &[SessionState::Connected],
            SessionState::Closing,
        );
        self.shared.teardown(status.epoch);
    }

    /// Publish an event and wait for the relay's `OK`.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let result = self.publish_inner(event).await;
        if let Err(e) = &result {
            warn!("Publish of {} failed: {}", event.id, e);
            self.shared
                .diagnostics
                .error(format!("Publish failed: {}", e), Some(SOURCE));
        }
        result
    }

    async fn publish_inner(&self, event: &Event) -> Result<PublishConfirmation> {
        let outbound = self.outbound().ok_or(ClientError::NotConnected)?;

        let mut pending = self.shared.mux.open_request(event.id.clone(), &[FrameKind::Ok]);
        let json = ClientMessage::Event(event.clone()).to_json()?;
        outbound
            .send(Message::text(json))
            .map_err(|_| ClientError::ConnectionClosed)?;
        debug!("Published event {}", event.id);

        let request_timeout = self.shared.config.request_timeout();
        match timeout(request_timeout, pending.recv()).await {
            Err(_) => Err(ClientError::RequestTimeout(request_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(RelayMessage::Ok {
                event_id,
                success: true,
                message,
            })) => Ok(PublishConfirmation { event_id, message }),
            Ok(Ok(RelayMessage::Ok { message, .. })) => Err(ClientError::Rejected(
                if message.is_empty() {
                    "Event was rejected by relay".to_string()
                } else {
                    message
                },
            )),
            Ok(Ok(other)) => Err(ClientError::Internal(format!(
                "unexpected {:?} frame for publish",
                other.kind()
            ))),
        }
    }

    /// Ask the relay how many events match. `None` means unknown.
    pub async fn count(&self, filter: Filter) -> Option<u64> {
        let outbound = self.outbound()?;
        let id = generate_subscription_id("count");

        let mut pending = self.shared.mux.open_request(id.clone(), &[FrameKind::Count]);
        send(&outbound, &ClientMessage::req(id.clone(), filter))?;

        let result = timeout(self.shared.config.request_timeout(), pending.recv()).await;
        drop(pending);
        send(&outbound, &ClientMessage::close(id.clone()));

        match result {
            Ok(Ok(RelayMessage::Count { count, .. })) => count,
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!("Count {} failed: {}", id, e);
                None
            }
            Err(_) => {
                debug!("Count {} timed out", id);
                None
            }
        }
    }

    /// Milliseconds between a minimal `REQ` and its `EOSE`. `None` on timeout
    /// or when not connected.
    pub async fn probe_round_trip(&self) -> Option<u64> {
        let outbound = self.outbound()?;
        let id = generate_subscription_id("ping");
        let filter = Filter::new().kinds(vec![KIND_SHORT_TEXT_NOTE]).limit(1);

        let mut pending = self.shared.mux.open_request(id.clone(), &[FrameKind::Eose]);
        let start = Instant::now();
        send(&outbound, &ClientMessage::req(id.clone(), filter))?;

        let result = timeout(self.shared.config.request_timeout(), pending.recv()).await;
        let elapsed = start.elapsed();
        drop(pending);
        send(&outbound, &ClientMessage::close(id.clone()));

        match result {
            Ok(Ok(_)) => Some(elapsed.as_millis() as u64),
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", id, e);
                None
            }
            Err(_) => {
                debug!("Probe {} timed out", id);
                None
            }
        }
    }

    /// Stream matching events to `on_event` until the returned handle is
    /// dropped or unsubscribed. While disconnected the handle is inert.
    pub fn subscribe<F>(&self, filter: Filter, on_event: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscribe_as("recent", filter, on_event)
    }

    /// [`subscribe`](Self::subscribe) with a caller-chosen id prefix.
    pub fn subscribe_as<F>(&self, prefix: &str, mut filter: Filter, on_event: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = generate_subscription_id(prefix);
        let Some(outbound) = self.outbound() else {
            debug!("Subscribe while disconnected; returning inert handle");
            return Subscription::inert(id);
        };

        if filter.limit.is_none() {
            filter.limit = Some(self.shared.config.default_subscription_limit);
        }

        let registration = self.shared.mux.open_subscription(id.clone(), Arc::new(on_event));
        if send(&outbound, &ClientMessage::req(id.clone(), filter)).is_none() {
            return Subscription::inert(id);
        }
        Subscription::new(registration, outbound)
    }

    pub fn state(&self) -> SessionState {
        self.shared.status().state
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// URL of the current or most recent connection attempt.
    pub fn url(&self) -> Option<String> {
        self.shared.url.lock().clone()
    }

    /// Monotonic start of the current connection.
    pub fn connected_at(&self) -> Option<Instant> {
        self.shared.connection.lock().as_ref().map(|c| c.connected_at)
    }

    /// Wall-clock start of the current connection.
    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        self.shared
            .connection
            .lock()
            .as_ref()
            .map(|c| c.connected_since)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.shared.diagnostics
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Handlers currently registered.
    pub fn pending_handlers(&self) -> usize {
        self.shared.mux.len()
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.shared
            .connection
            .lock()
            .as_ref()
            .map(|c| c.outbound.clone())
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("url", &self.url())
            .field("status", &self.status())
            .finish()
    }
}

fn send(outbound: &mpsc::UnboundedSender<Message>, msg: &ClientMessage) -> Option<()> {
    let json = match msg.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            return None;
        }
    };
    outbound.send(Message::text(json)).ok()
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>, epoch: u64) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.handle_text(text.as_str()),
            Ok(Message::Close(frame)) => {
                info!("Relay closed connection: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                shared.record_error(format!("WebSocket error: {}", e));
                break;
            }
        }
    }
    shared.teardown(epoch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_session() {
        let session = RelaySession::new();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.status().epoch, 0);
        assert!(session.url().is_none());
        assert!(session.connected_at().is_none());

        // Everything degrades without a socket.
        session.disconnect();
        assert_eq!(session.count(Filter::new().kinds(vec![1])).await, None);
        assert_eq!(session.probe_round_trip().await, None);
        let sub = session.subscribe(Filter::new(), |_| {});
        assert!(!sub.is_active());
        assert_eq!(session.pending_handlers(), 0);
    }

    #[tokio::test]
    async fn test_publish_not_connected() {
        let session = RelaySession::new();
        let event = Event {
            id: "abc".to_string(),
            pubkey: "pk".to_string(),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        assert!(matches!(
            session.publish(&event).await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(session.diagnostics().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let session = RelaySession::new();
        assert!(matches!(
            session.connect("https://relay.example.com").await,
            Err(ClientError::InvalidUrl(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
