//! NIP-46 remote signing over a [`RelaySession`].
//!
//! A [`BunkerSigner`] holds a throwaway client key, listens for kind 24133
//! replies tagged with it, and sends NIP-44 encrypted requests to the remote
//! signer. Replies are matched to requests by id.

use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::session::RelaySession;
use crate::subscription::Subscription;
use async_trait::async_trait;
use nostr::{
    BunkerUrl, Event, EventSigner, EventTemplate, KIND_NOSTR_CONNECT, LocalSigner,
    NostrConnectMethod, NostrConnectRequest, NostrConnectResponse, SignerError,
    is_nostr_connect_event, normalize_pubkey, nostr_connect_template, unix_now,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How long to wait for the remote signer to answer one request.
pub const DEFAULT_BUNKER_TIMEOUT: Duration = Duration::from_secs(60);

pub const INVALID_BUNKER_INPUT: &str =
    "Invalid bunker URL. Use bunker://pubkey?relay=wss://... or nip05@domain";

const SOURCE: &str = "NIP-46";

// Replies may be stamped slightly before our subscription opens.
const SINCE_SLACK_SECS: u64 = 10;

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<NostrConnectResponse>>>>;

/// Parse `bunker://...` directly or resolve `name@domain` over NIP-05.
pub async fn parse_bunker_input(input: &str) -> Result<BunkerUrl> {
    let input = input.trim();
    if input.starts_with("bunker://") {
        return BunkerUrl::parse(input)
            .map_err(|e| ClientError::InvalidUrl(format!("{} ({})", INVALID_BUNKER_INPUT, e)));
    }

    let Some((name, domain)) = input.split_once('@') else {
        return Err(ClientError::InvalidUrl(INVALID_BUNKER_INPUT.to_string()));
    };
    if name.is_empty() || domain.is_empty() {
        return Err(ClientError::InvalidUrl(INVALID_BUNKER_INPUT.to_string()));
    }

    let url = nip05_lookup_url(name, domain);
    debug!("Resolving bunker {} via {}", input, url);
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ClientError::Http(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Http(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| ClientError::Http(e.to_string()))?;
    let document: Value = serde_json::from_slice(&body)?;

    bunker_from_nip05(&document, name)
        .ok_or_else(|| ClientError::InvalidUrl(INVALID_BUNKER_INPUT.to_string()))
}

/// `https://<domain>/.well-known/nostr.json?name=<name>`
pub fn nip05_lookup_url(name: &str, domain: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("name", name)
        .finish();
    format!("https://{}/.well-known/nostr.json?{}", domain, query)
}

/// Remote signer from a NIP-05 document: `names[name]` plus its `nip46` relays.
pub fn bunker_from_nip05(document: &Value, name: &str) -> Option<BunkerUrl> {
    let remote_pubkey = document
        .get("names")?
        .get(name)?
        .as_str()
        .and_then(normalize_pubkey)?;
    let relays: Vec<String> = document
        .get("nip46")?
        .get(&remote_pubkey)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if relays.is_empty() {
        return None;
    }

    Some(BunkerUrl {
        remote_pubkey,
        relays,
        secret: None,
    })
}

/// Signs through a remote NIP-46 signer.
pub struct BunkerSigner {
    session: Arc<RelaySession>,
    client: Arc<LocalSigner>,
    remote_pubkey: String,
    user_pubkey: String,
    pending: PendingReplies,
    timeout: Duration,
    _replies: Subscription,
}

impl BunkerSigner {
    /// Resolve `input`, reach the first answering relay and complete the
    /// `connect` and `get_public_key` handshake.
    pub async fn connect(input: &str) -> Result<Self> {
        let bunker = parse_bunker_input(input).await?;
        Self::connect_with(bunker, SessionConfig::default(), DEFAULT_BUNKER_TIMEOUT).await
    }

    pub async fn connect_with(
        bunker: BunkerUrl,
        config: SessionConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let session = Arc::new(RelaySession::with_config(config));
        let mut last_error = None;
        for relay in &bunker.relays {
            match session.connect(relay).await {
                Ok(()) => break,
                Err(e) => {
                    warn!("Bunker relay {} unavailable: {}", relay, e);
                    last_error = Some(e);
                }
            }
        }
        if !session.is_connected() {
            return Err(last_error.unwrap_or(ClientError::NotConnected));
        }

        Self::over_session(session, bunker, timeout).await
    }

    /// Run the handshake over an already connected session.
    pub async fn over_session(
        session: Arc<RelaySession>,
        bunker: BunkerUrl,
        timeout: Duration,
    ) -> Result<Self> {
        let BunkerUrl {
            remote_pubkey,
            secret,
            ..
        } = bunker;
        let client = Arc::new(LocalSigner::generate()?);
        let pending = PendingReplies::default();

        let filter = Filter::new()
            .kinds(vec![KIND_NOSTR_CONNECT])
            .tag("p", vec![client.public_key().to_string()])
            .since(unix_now().saturating_sub(SINCE_SLACK_SECS));
        let replies = {
            let client = Arc::clone(&client);
            let pending = Arc::clone(&pending);
            let remote = remote_pubkey.clone();
            let log = session.diagnostics().clone();
            session.subscribe_as("nip46", filter, move |event| {
                if let Some(url) = route_reply(&client, &remote, &pending, event) {
                    info!("Remote signer asks for approval at {}", url);
                    log.warn(format!("Approve the request at {}", url), Some(SOURCE));
                }
            })
        };

        let mut signer = Self {
            session,
            client,
            remote_pubkey,
            user_pubkey: String::new(),
            pending,
            timeout,
            _replies: replies,
        };

        let mut params = vec![signer.remote_pubkey.clone()];
        params.extend(secret);
        signer.request(NostrConnectMethod::Connect, params).await?;

        let pubkey = signer
            .request(NostrConnectMethod::GetPublicKey, vec![])
            .await?;
        signer.user_pubkey = normalize_pubkey(&pubkey).ok_or_else(|| {
            SignerError::Remote(format!("invalid public key from remote signer: {}", pubkey))
        })?;

        info!(
            "Connected to remote signer {} for {}",
            signer.remote_pubkey, signer.user_pubkey
        );
        signer
            .session
            .diagnostics()
            .info("Connected to remote signer", Some(SOURCE));
        Ok(signer)
    }

    pub fn remote_pubkey(&self) -> &str {
        &self.remote_pubkey
    }

    /// Hex pubkey of the throwaway key used to talk to the remote signer.
    pub fn client_pubkey(&self) -> &str {
        self.client.public_key()
    }

    pub fn session(&self) -> &Arc<RelaySession> {
        &self.session
    }

    pub async fn ping(&self) -> Result<()> {
        self.request(NostrConnectMethod::Ping, vec![]).await?;
        Ok(())
    }

    async fn request(&self, method: NostrConnectMethod, params: Vec<String>) -> Result<String> {
        let request = NostrConnectRequest::new(method, params);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request.id.clone(), tx);

        let result = self.send_and_wait(&request, rx).await;
        self.pending.lock().remove(&request.id);
        result
    }

    async fn send_and_wait(
        &self,
        request: &NostrConnectRequest,
        reply: oneshot::Receiver<NostrConnectResponse>,
    ) -> Result<String> {
        let json = request
            .to_json()
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        let content = self.client.nip44_encrypt(&self.remote_pubkey, &json)?;
        let event = self
            .client
            .finalize(&nostr_connect_template(&self.remote_pubkey, content))?;

        debug!("Sending {} request {}", request.method.as_str(), request.id);
        self.session.publish(&event).await?;

        let response = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                return Err(SignerError::Remote(format!(
                    "no reply to {} within {:?}",
                    request.method.as_str(),
                    self.timeout
                ))
                .into());
            }
        };

        match response.error {
            Some(error) if !error.is_empty() => Err(SignerError::Remote(error).into()),
            _ => Ok(response.result),
        }
    }

    async fn sign_remote(&self, template: &EventTemplate) -> Result<Event> {
        let params = vec![serde_json::to_string(template)?];
        let result = self.request(NostrConnectMethod::SignEvent, params).await?;
        let event: Event = serde_json::from_str(&result)?;

        if event.pubkey != self.user_pubkey {
            return Err(SignerError::Remote(format!(
                "signed by {} instead of {}",
                event.pubkey, self.user_pubkey
            ))
            .into());
        }
        if event.kind != template.kind
            || event.content != template.content
            || event.tags != template.tags
        {
            return Err(SignerError::Remote("signed event differs from request".to_string()).into());
        }
        if !matches!(event.verify(), Ok(true)) {
            return Err(SignerError::Remote("invalid signature from remote signer".to_string()).into());
        }
        Ok(event)
    }
}

#[async_trait]
impl EventSigner for BunkerSigner {
    fn public_key(&self) -> &str {
        &self.user_pubkey
    }

    async fn sign(&self, template: &EventTemplate) -> std::result::Result<Event, SignerError> {
        self.sign_remote(template).await.map_err(|e| match e {
            ClientError::Signer(inner) => inner,
            other => SignerError::Remote(other.to_string()),
        })
    }
}

impl std::fmt::Debug for BunkerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BunkerSigner")
            .field("remote_pubkey", &self.remote_pubkey)
            .field("user_pubkey", &self.user_pubkey)
            .finish_non_exhaustive()
    }
}

/// Hand a reply to its waiting request. Returns the approval URL of an
/// `auth_url` challenge, which leaves the request waiting.
fn route_reply(
    client: &LocalSigner,
    remote: &str,
    pending: &PendingReplies,
    event: Event,
) -> Option<String> {
    if !is_nostr_connect_event(&event) || event.pubkey != remote {
        debug!("Ignoring event {} from {}", event.id, event.pubkey);
        return None;
    }

    let response = match client
        .nip44_decrypt(remote, &event.content)
        .map_err(|e| e.to_string())
        .and_then(|plain| NostrConnectResponse::from_json(&plain).map_err(|e| e.to_string()))
    {
        Ok(response) => response,
        Err(e) => {
            debug!("Unreadable reply {}: {}", event.id, e);
            return None;
        }
    };

    if response.is_auth_challenge() {
        return Some(response.error.unwrap_or_default());
    }

    match pending.lock().remove(&response.id) {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!("Reply for unknown request {}", response.id),
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const REMOTE: &str = "fa984bd7dbb282f07e16e7ae87b26a2a7b9b90b7246a44771f0cf5ae58018f52";

    #[test]
    fn test_nip05_lookup_url() {
        assert_eq!(
            nip05_lookup_url("bob", "example.com"),
            "https://example.com/.well-known/nostr.json?name=bob"
        );
    }

    #[test]
    fn test_bunker_from_nip05() {
        let document = json!({
            "names": {"bob": REMOTE},
            "nip46": {REMOTE: ["wss://relay.example.com"]}
        });
        assert_eq!(
            bunker_from_nip05(&document, "bob"),
            Some(BunkerUrl {
                remote_pubkey: REMOTE.to_string(),
                relays: vec!["wss://relay.example.com".to_string()],
                secret: None,
            })
        );
        assert_eq!(bunker_from_nip05(&document, "alice"), None);

        let no_relays = json!({"names": {"bob": REMOTE}});
        assert_eq!(bunker_from_nip05(&no_relays, "bob"), None);
    }

    #[tokio::test]
    async fn test_parse_bunker_input() {
        let url = parse_bunker_input(&format!(" bunker://{}?relay=wss://r.example.com ", REMOTE))
            .await
            .unwrap();
        assert_eq!(url.remote_pubkey, REMOTE);

        for bad in ["", "nope", "@example.com", "bunker://xyz?relay=wss://r.example.com"] {
            match parse_bunker_input(bad).await {
                Err(ClientError::InvalidUrl(message)) => {
                    assert!(message.starts_with(INVALID_BUNKER_INPUT), "{}", message)
                }
                other => panic!("expected invalid input for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_route_reply() {
        let client = LocalSigner::generate().unwrap();
        let remote = LocalSigner::generate().unwrap();
        let pending = PendingReplies::default();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert("42".to_string(), tx);

        let reply = |response: NostrConnectResponse| {
            let content = remote
                .nip44_encrypt(client.public_key(), &response.to_json().unwrap())
                .unwrap();
            remote
                .finalize(&nostr_connect_template(client.public_key(), content))
                .unwrap()
        };

        let challenge = NostrConnectResponse {
            id: "42".to_string(),
            result: "auth_url".to_string(),
            error: Some("https://signer.example.com/approve".to_string()),
        };
        assert_eq!(
            route_reply(&client, remote.public_key(), &pending, reply(challenge)).as_deref(),
            Some("https://signer.example.com/approve")
        );
        assert!(rx.try_recv().is_err());

        route_reply(
            &client,
            remote.public_key(),
            &pending,
            reply(NostrConnectResponse::ok("42", "ack")),
        );
        assert_eq!(rx.try_recv().unwrap().result, "ack");
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_route_reply_ignores_other_authors() {
        let client = LocalSigner::generate().unwrap();
        let remote = LocalSigner::generate().unwrap();
        let stranger = LocalSigner::generate().unwrap();
        let pending = PendingReplies::default();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert("1".to_string(), tx);

        let content = stranger
            .nip44_encrypt(
                client.public_key(),
                &NostrConnectResponse::ok("1", "ack").to_json().unwrap(),
            )
            .unwrap();
        let event = stranger
            .finalize(&nostr_connect_template(client.public_key(), content))
            .unwrap();

        assert_eq!(route_reply(&client, remote.public_key(), &pending, event), None);
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.lock().len(), 1);
    }
}
