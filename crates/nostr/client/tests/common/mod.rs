//! In-process mock relay for session tests.
//!
//! Accepts WebSocket connections one at a time, forwards every text frame the
//! client sends to the test, and lets the test push frames or close the socket.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nostr::{Event, EventTemplate, KIND_SHORT_TEXT_NOTE, LocalSigner};
use nostr_client::{ClientMessage, Filter};
use std::sync::Once;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_SECRET_KEY: &str =
    "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a";

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn signer() -> LocalSigner {
    LocalSigner::parse(TEST_SECRET_KEY).unwrap()
}

pub fn note(content: &str) -> Event {
    signer()
        .finalize(&EventTemplate::now(KIND_SHORT_TEXT_NOTE, vec![], content))
        .unwrap()
}

enum Control {
    Send(String),
    Close,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// Answer every `REQ` whose id starts with `ping-` with `EOSE`.
    pub answer_pings: bool,
    /// Accept every `EVENT` with a successful `OK`.
    pub accept_events: bool,
}

pub struct MockRelay {
    pub url: String,
    inbound: mpsc::UnboundedReceiver<String>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockRelay {
    pub async fn start() -> Self {
        Self::start_with(MockBehavior::default()).await
    }

    pub async fn start_with(behavior: MockBehavior) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (control, mut control_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (mut sink, mut stream) = ws.split();

                loop {
                    tokio::select! {
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let text = text.as_str().to_string();
                                if behavior.answer_pings
                                    && let Some(id) = ping_id(&text)
                                {
                                    let eose = format!(r#"["EOSE","{}"]"#, id);
                                    let _ = sink.send(Message::text(eose)).await;
                                }
                                if behavior.accept_events
                                    && let Some(id) = event_id(&text)
                                {
                                    let ok = format!(r#"["OK","{}",true,""]"#, id);
                                    let _ = sink.send(Message::text(ok)).await;
                                }
                                let _ = inbound_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        control = control_rx.recv() => match control {
                            Some(Control::Send(text)) => {
                                let _ = sink.send(Message::text(text)).await;
                            }
                            Some(Control::Close) => {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            url,
            inbound,
            control,
        }
    }

    /// Next text frame from the client.
    pub async fn recv(&mut self) -> String {
        timeout(RECV_TIMEOUT, self.inbound.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("mock relay stopped")
    }

    pub async fn recv_message(&mut self) -> ClientMessage {
        let text = self.recv().await;
        ClientMessage::from_json(&text).unwrap_or_else(|e| panic!("bad frame {}: {}", text, e))
    }

    /// Skip frames until one matches.
    pub async fn recv_until<F>(&mut self, mut pred: F) -> ClientMessage
    where
        F: FnMut(&ClientMessage) -> bool,
    {
        loop {
            let msg = self.recv_message().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Next `REQ` whose id starts with `prefix`.
    pub async fn recv_req(&mut self, prefix: &str) -> (String, Vec<Filter>) {
        match self
            .recv_until(|msg| {
                matches!(msg, ClientMessage::Req { subscription_id, .. } if subscription_id.starts_with(prefix))
            })
            .await
        {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => (subscription_id, filters),
            _ => unreachable!(),
        }
    }

    /// Next `CLOSE` for `id`.
    pub async fn recv_close(&mut self, id: &str) {
        self.recv_until(
            |msg| matches!(msg, ClientMessage::Close { subscription_id } if subscription_id == id),
        )
        .await;
    }

    /// Assert the client sends nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(text)) = timeout(window, self.inbound.recv()).await {
            panic!("unexpected client frame: {}", text);
        }
    }

    pub fn send(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Send(text.into()));
    }

    pub fn send_event(&self, subscription_id: &str, event: &Event) {
        self.send(serde_json::json!(["EVENT", subscription_id, event]).to_string());
    }

    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }
}

fn ping_id(text: &str) -> Option<String> {
    match ClientMessage::from_json(text).ok()? {
        ClientMessage::Req {
            subscription_id, ..
        } if subscription_id.starts_with("ping-") => Some(subscription_id),
        _ => None,
    }
}

fn event_id(text: &str) -> Option<String> {
    match ClientMessage::from_json(text).ok()? {
        ClientMessage::Event(event) => Some(event.id),
        _ => None,
    }
}

/// A listener that accepts TCP connections but never answers the handshake.
pub async fn silent_listener() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (url, handle)
}
