//! Subscription ids and the handle returned by [`RelaySession::subscribe`].
//!
//! [`RelaySession::subscribe`]: crate::RelaySession::subscribe

use crate::message::ClientMessage;
use crate::multiplexer::Registration;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use uuid::Uuid;

/// Generate a subscription id: `<prefix>-<unix millis>-<8 hex chars>`.
pub fn generate_subscription_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, millis, &suffix[..8])
}

/// A live subscription.
///
/// Unsubscribing sends `CLOSE` and stops delivery. It is idempotent and also
/// happens on drop. A subscription opened while disconnected is inert.
#[must_use = "dropping a Subscription closes it"]
pub struct Subscription {
    id: String,
    active: Option<(Registration, mpsc::UnboundedSender<Message>)>,
}

impl Subscription {
    pub(crate) fn new(registration: Registration, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: registration.id().to_string(),
            active: Some((registration, outbound)),
        }
    }

    pub(crate) fn inert(id: String) -> Self {
        Self { id, active: None }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether events for this subscription are still being delivered.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(registration, _)| registration.is_active())
    }

    pub fn unsubscribe(&mut self) {
        let Some((registration, outbound)) = self.active.take() else {
            return;
        };
        drop(registration);

        match ClientMessage::close(self.id.clone()).to_json() {
            Ok(json) => {
                if outbound.send(Message::text(json)).is_err() {
                    debug!("Socket gone before CLOSE for {}", self.id);
                }
            }
            Err(e) => debug!("Failed to encode CLOSE for {}: {}", self.id, e),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::Multiplexer;
    use std::sync::Arc;

    #[test]
    fn test_generate_subscription_id() {
        let id = generate_subscription_id("ping");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ping");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 8);

        assert_ne!(generate_subscription_id("ping"), generate_subscription_id("ping"));
    }

    #[test]
    fn test_unsubscribe_sends_close_once() {
        let mux = Multiplexer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registration = mux.open_subscription("recent-1", Arc::new(|_| {}));
        let mut sub = Subscription::new(registration, tx);
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert!(mux.is_empty());
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.to_text().unwrap(), r#"["CLOSE","recent-1"]"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let mux = Multiplexer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let _sub = Subscription::new(mux.open_subscription("recent-2", Arc::new(|_| {})), tx);
        }
        assert!(mux.is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_inert_subscription() {
        let mut sub = Subscription::inert("recent-3".to_string());
        assert!(!sub.is_active());
        sub.unsubscribe();
        assert_eq!(sub.id(), "recent-3");
    }
}
