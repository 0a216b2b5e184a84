//! Correlation table for one relay session.
//!
//! Maps a correlation id (subscription id, or event id for publishes) to the
//! handler waiting on it. Dispatch is a synchronous lookup: each inbound frame
//! reaches at most one handler.
//!
//! Handlers are owned by guards. Dropping a [`PendingRequest`] or a
//! [`Registration`] removes its entry, but only if the entry still belongs to
//! that guard; a newer registration under the same id is left alone.

use crate::error::{ClientError, Result};
use crate::message::{FrameKind, RelayMessage};
use nostr::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Per-event callback for a live subscription.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

enum Handler {
    Request {
        expects: Vec<FrameKind>,
        tx: oneshot::Sender<Result<RelayMessage>>,
    },
    Subscription {
        callback: EventCallback,
    },
}

enum Action {
    Resolve,
    Fail,
    Discard,
    Deliver(EventCallback),
}

struct Entry {
    generation: u64,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    next_generation: u64,
    entries: HashMap<String, Entry>,
}

impl Table {
    fn insert(&mut self, id: &str, handler: Handler) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;

        let displaced = self.entries.insert(
            id.to_string(),
            Entry {
                generation,
                handler,
            },
        );

        if let Some(old) = displaced {
            warn!("Correlation id {} re-registered; replacing previous handler", id);
            if let Handler::Request { tx, .. } = old.handler {
                let _ = tx.send(Err(ClientError::Internal(format!(
                    "request {} superseded by a newer registration",
                    id
                ))));
            }
        }

        generation
    }

    fn remove_if_current(&mut self, id: &str, generation: u64) -> bool {
        match self.entries.get(id) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(id);
                true
            }
            _ => false,
        }
    }
}

/// Correlation table shared by a session's reader task and its callers.
#[derive(Clone, Default)]
pub struct Multiplexer {
    table: Arc<Mutex<Table>>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request that completes on the first frame of one of `expects`.
    ///
    /// A `CLOSED` frame for the id fails it with the relay's reason.
    pub fn open_request(&self, id: impl Into<String>, expects: &[FrameKind]) -> PendingRequest {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let generation = self.table.lock().insert(
            &id,
            Handler::Request {
                expects: expects.to_vec(),
                tx,
            },
        );

        PendingRequest {
            id,
            generation,
            rx,
            mux: self.clone(),
        }
    }

    /// Register a subscription; `callback` runs for every `EVENT` frame with this id.
    pub fn open_subscription(&self, id: impl Into<String>, callback: EventCallback) -> Registration {
        let id = id.into();
        let generation = self
            .table
            .lock()
            .insert(&id, Handler::Subscription { callback });

        Registration {
            id,
            generation,
            mux: self.clone(),
        }
    }

    /// Route a frame to its handler. Returns whether a handler consumed it.
    pub fn dispatch(&self, msg: &RelayMessage) -> bool {
        let Some(id) = msg.correlation_id() else {
            return false;
        };
        let kind = msg.kind();

        let callback = {
            let mut table = self.table.lock();
            let action = match table.entries.get(id).map(|entry| &entry.handler) {
                None => {
                    debug!("No handler for {:?} frame {}", kind, id);
                    return false;
                }
                Some(Handler::Request { expects, .. }) => {
                    if expects.contains(&kind) {
                        Action::Resolve
                    } else if kind == FrameKind::Closed {
                        Action::Fail
                    } else {
                        return false;
                    }
                }
                Some(Handler::Subscription { callback }) => match kind {
                    FrameKind::Event => Action::Deliver(callback.clone()),
                    FrameKind::Closed => Action::Discard,
                    _ => return false,
                },
            };

            match action {
                Action::Resolve | Action::Fail => {
                    if let Some(Entry {
                        handler: Handler::Request { tx, .. },
                        ..
                    }) = table.entries.remove(id)
                    {
                        let result = match (action, msg) {
                            (Action::Fail, RelayMessage::Closed { message, .. }) => {
                                Err(ClientError::Rejected(message.clone()))
                            }
                            _ => Ok(msg.clone()),
                        };
                        let _ = tx.send(result);
                    }
                    return true;
                }
                Action::Discard => {
                    debug!("Relay closed subscription {}", id);
                    table.entries.remove(id);
                    return true;
                }
                Action::Deliver(callback) => callback,
            }
        };

        // Run user code outside the lock so it may unsubscribe or issue requests.
        if let RelayMessage::Event { event, .. } = msg {
            callback(event.clone());
        }
        true
    }

    /// Fail every pending request with `ConnectionClosed` and drop every
    /// subscription. Returns how many entries were discarded.
    pub fn close_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut table = self.table.lock();
            table.entries.drain().map(|(_, entry)| entry).collect()
        };

        let discarded = entries.len();
        for entry in entries {
            if let Handler::Request { tx, .. } = entry.handler {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
            }
        }
        discarded
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unregister(&self, id: &str, generation: u64) -> bool {
        self.table.lock().remove_if_current(id, generation)
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("entries", &self.len())
            .finish()
    }
}

/// One outstanding request. Resolves exactly once; unregisters on drop.
pub struct PendingRequest {
    id: String,
    generation: u64,
    rx: oneshot::Receiver<Result<RelayMessage>>,
    mux: Multiplexer,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the terminal frame. Callers bound this with a timeout.
    pub async fn recv(&mut self) -> Result<RelayMessage> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.mux.unregister(&self.id, self.generation);
    }
}

/// Guard for a subscription handler.
pub struct Registration {
    id: String,
    generation: u64,
    mux: Multiplexer,
}

impl Registration {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the handler is still in the table.
    pub fn is_active(&self) -> bool {
        let table = self.mux.table.lock();
        table
            .entries
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.mux.unregister(&self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event_frame(sub_id: &str, id: &str) -> RelayMessage {
        RelayMessage::Event {
            subscription_id: sub_id.to_string(),
            event: Event {
                id: id.to_string(),
                pubkey: "pk".to_string(),
                created_at: 0,
                kind: 1,
                tags: vec![],
                content: String::new(),
                sig: String::new(),
            },
        }
    }

    fn counting_callback() -> (EventCallback, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: EventCallback = Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, hits)
    }

    #[tokio::test]
    async fn test_request_resolves_on_expected_frame() {
        let mux = Multiplexer::new();
        let mut pending = mux.open_request("ping-1", &[FrameKind::Eose]);

        // Not the expected kind: left for someone else.
        assert!(!mux.dispatch(&RelayMessage::decode(r#"["COUNT","ping-1",1]"#)));
        assert!(mux.dispatch(&RelayMessage::decode(r#"["EOSE","ping-1"]"#)));
        assert!(!mux.contains("ping-1"));

        let msg = pending.recv().await.unwrap();
        assert_eq!(msg.kind(), FrameKind::Eose);
    }

    #[tokio::test]
    async fn test_request_resolves_once() {
        let mux = Multiplexer::new();
        let mut pending = mux.open_request("count-1", &[FrameKind::Count]);

        assert!(mux.dispatch(&RelayMessage::decode(r#"["COUNT","count-1",1]"#)));
        assert!(!mux.dispatch(&RelayMessage::decode(r#"["COUNT","count-1",2]"#)));

        match pending.recv().await.unwrap() {
            RelayMessage::Count { count, .. } => assert_eq!(count, Some(1)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_fails_request() {
        let mux = Multiplexer::new();
        let mut pending = mux.open_request("count-1", &[FrameKind::Count]);

        assert!(mux.dispatch(&RelayMessage::decode(
            r#"["CLOSED","count-1","unsupported: COUNT"]"#
        )));
        match pending.recv().await {
            Err(ClientError::Rejected(reason)) => assert_eq!(reason, "unsupported: COUNT"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_unregisters_request() {
        let mux = Multiplexer::new();
        let pending = mux.open_request("ok-1", &[FrameKind::Ok]);
        assert!(mux.contains("ok-1"));
        drop(pending);
        assert!(mux.is_empty());
        assert!(!mux.dispatch(&RelayMessage::decode(r#"["OK","ok-1",true,""]"#)));
    }

    #[test]
    fn test_subscription_receives_events() {
        let mux = Multiplexer::new();
        let (callback, hits) = counting_callback();
        let registration = mux.open_subscription("recent-1", callback);

        assert!(mux.dispatch(&event_frame("recent-1", "a")));
        assert!(mux.dispatch(&event_frame("recent-1", "b")));
        assert!(!mux.dispatch(&event_frame("recent-2", "c")));
        assert!(!mux.dispatch(&RelayMessage::decode(r#"["EOSE","recent-1"]"#)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        drop(registration);
        assert!(!mux.dispatch(&event_frame("recent-1", "d")));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_discards_subscription() {
        let mux = Multiplexer::new();
        let (callback, hits) = counting_callback();
        let registration = mux.open_subscription("recent-1", callback);

        assert!(mux.dispatch(&RelayMessage::decode(r#"["CLOSED","recent-1","bye"]"#)));
        assert!(!registration.is_active());
        assert!(!mux.dispatch(&event_frame("recent-1", "a")));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_touch_table() {
        let mux = Multiplexer::new();
        let inner = mux.clone();
        let registration = mux.open_subscription(
            "recent-1",
            Arc::new(move |_event| {
                let _ = inner.len();
            }),
        );
        assert!(mux.dispatch(&event_frame("recent-1", "a")));
        drop(registration);
    }

    #[tokio::test]
    async fn test_close_all() {
        let mux = Multiplexer::new();
        let mut first = mux.open_request("ok-1", &[FrameKind::Ok]);
        let mut second = mux.open_request("count-1", &[FrameKind::Count]);
        let (callback, hits) = counting_callback();
        let registration = mux.open_subscription("recent-1", callback);

        assert_eq!(mux.close_all(), 3);
        assert!(mux.is_empty());
        assert!(!registration.is_active());
        assert!(matches!(first.recv().await, Err(ClientError::ConnectionClosed)));
        assert!(matches!(second.recv().await, Err(ClientError::ConnectionClosed)));

        assert!(!mux.dispatch(&event_frame("recent-1", "a")));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_later_registration_wins() {
        let mux = Multiplexer::new();
        let mut old = mux.open_request("dup", &[FrameKind::Eose]);
        let mut new = mux.open_request("dup", &[FrameKind::Eose]);

        assert!(matches!(old.recv().await, Err(ClientError::Internal(_))));
        drop(old);
        // The displaced guard must not remove the newer entry.
        assert!(mux.contains("dup"));

        assert!(mux.dispatch(&RelayMessage::decode(r#"["EOSE","dup"]"#)));
        assert!(new.recv().await.is_ok());
    }

    #[test]
    fn test_frames_without_id_are_ignored() {
        let mux = Multiplexer::new();
        assert!(!mux.dispatch(&RelayMessage::decode(r#"["NOTICE","hello"]"#)));
        assert!(!mux.dispatch(&RelayMessage::decode("garbage")));
    }
}
