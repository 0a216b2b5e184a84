//! NIP-46: Nostr Remote Signing
//!
//! Message types for talking to a remote signer ("bunker"). Requests and
//! responses travel as NIP-44 encrypted content of kind 24133 events tagged
//! with the recipient's pubkey. The transport lives in `nostr-client`.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/46.md>

use crate::nip01::{Event, EventTemplate, is_lower_hex, unix_now};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;
use url::form_urlencoded;

/// Nostr Connect request/response kind
pub const KIND_NOSTR_CONNECT: u16 = 24133;

/// Result a signer sends when the user must approve in a browser first.
pub const AUTH_URL_RESULT: &str = "auth_url";

#[derive(Debug, Error)]
pub enum Nip46Error {
    #[error("invalid bunker URL: {0}")]
    InvalidUrl(String),

    #[error("bunker URL has no relay")]
    MissingRelay,

    #[error("invalid remote signer pubkey: {0}")]
    InvalidPubkey(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parsed `bunker://<remote-signer-pubkey>?relay=<wss://...>&secret=<optional>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunkerUrl {
    pub remote_pubkey: String,
    pub relays: Vec<String>,
    pub secret: Option<String>,
}

impl BunkerUrl {
    pub fn parse(input: &str) -> Result<Self, Nip46Error> {
        let url = Url::parse(input.trim()).map_err(|e| Nip46Error::InvalidUrl(e.to_string()))?;
        if url.scheme() != "bunker" {
            return Err(Nip46Error::InvalidUrl(format!(
                "expected bunker:// scheme, got {}://",
                url.scheme()
            )));
        }

        let remote_pubkey = url.host_str().unwrap_or_default().to_lowercase();
        if !is_lower_hex(&remote_pubkey, 64) {
            return Err(Nip46Error::InvalidPubkey(remote_pubkey));
        }

        let mut relays = Vec::new();
        let mut secret = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" if !value.trim().is_empty() => relays.push(value.trim().to_string()),
                "secret" if !value.is_empty() => secret = Some(value.into_owned()),
                _ => {}
            }
        }
        if relays.is_empty() {
            return Err(Nip46Error::MissingRelay);
        }

        Ok(Self {
            remote_pubkey,
            relays,
            secret,
        })
    }
}

impl FromStr for BunkerUrl {
    type Err = Nip46Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BunkerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        write!(f, "bunker://{}?{}", self.remote_pubkey, query.finish())
    }
}

/// Methods this client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NostrConnectMethod {
    Connect,
    GetPublicKey,
    SignEvent,
    Ping,
}

impl NostrConnectMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::GetPublicKey => "get_public_key",
            Self::SignEvent => "sign_event",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrConnectRequest {
    pub id: String,
    pub method: NostrConnectMethod,
    pub params: Vec<String>,
}

impl NostrConnectRequest {
    pub fn new(method: NostrConnectMethod, params: Vec<String>) -> Self {
        Self {
            id: generate_request_id(),
            method,
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, Nip46Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Nip46Error> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrConnectResponse {
    pub id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NostrConnectResponse {
    pub fn ok(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: result.into(),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: String::new(),
            error: Some(error.into()),
        }
    }

    /// `result == "auth_url"`; the URL to open is in `error`.
    pub fn is_auth_challenge(&self) -> bool {
        self.result == AUTH_URL_RESULT
    }

    pub fn to_json(&self) -> Result<String, Nip46Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Nip46Error> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Random 16-character hex id.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_nostr_connect_event(event: &Event) -> bool {
    event.kind == KIND_NOSTR_CONNECT
}

/// Kind 24133 envelope for already-encrypted `content` addressed to `recipient`.
pub fn nostr_connect_template(recipient: &str, content: impl Into<String>) -> EventTemplate {
    EventTemplate {
        created_at: unix_now(),
        kind: KIND_NOSTR_CONNECT,
        tags: vec![vec!["p".to_string(), recipient.to_string()]],
        content: content.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const REMOTE: &str = "fa984bd7dbb282f07e16e7ae87b26a2a7b9b90b7246a44771f0cf5ae58018f52";

    #[test]
    fn test_parse_bunker_url() {
        let url = BunkerUrl::parse(&format!(
            "bunker://{}?relay=wss%3A%2F%2Frelay.example.com&relay=wss://relay2.example.com&secret=s3cret",
            REMOTE.to_uppercase()
        ))
        .unwrap();

        assert_eq!(url.remote_pubkey, REMOTE);
        assert_eq!(
            url.relays,
            vec!["wss://relay.example.com", "wss://relay2.example.com"]
        );
        assert_eq!(url.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_display_round_trips() {
        let url = BunkerUrl {
            remote_pubkey: REMOTE.to_string(),
            relays: vec!["wss://relay.example.com".to_string()],
            secret: None,
        };
        assert_eq!(BunkerUrl::parse(&url.to_string()).unwrap(), url);
    }

    #[test]
    fn test_rejects_bad_bunker_urls() {
        assert!(matches!(
            BunkerUrl::parse(&format!("bunker://{}", REMOTE)),
            Err(Nip46Error::MissingRelay)
        ));
        assert!(matches!(
            BunkerUrl::parse("bunker://abc?relay=wss://relay.example.com"),
            Err(Nip46Error::InvalidPubkey(_))
        ));
        assert!(matches!(
            BunkerUrl::parse(&format!("nostrconnect://{}?relay=wss://r.example.com", REMOTE)),
            Err(Nip46Error::InvalidUrl(_))
        ));
        assert!(matches!(
            BunkerUrl::parse("not a url"),
            Err(Nip46Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let request = NostrConnectRequest {
            id: "1".to_string(),
            method: NostrConnectMethod::GetPublicKey,
            params: vec![],
        };
        assert_eq!(
            request.to_json().unwrap(),
            r#"{"id":"1","method":"get_public_key","params":[]}"#
        );
        assert_eq!(NostrConnectRequest::from_json(&request.to_json().unwrap()).unwrap(), request);
    }

    #[test]
    fn test_response_parsing() {
        let ack = NostrConnectResponse::from_json(r#"{"id":"1","result":"ack"}"#).unwrap();
        assert_eq!(ack, NostrConnectResponse::ok("1", "ack"));

        let auth = NostrConnectResponse::from_json(
            r#"{"id":"2","result":"auth_url","error":"https://signer.example.com/approve"}"#,
        )
        .unwrap();
        assert!(auth.is_auth_challenge());

        let failed = NostrConnectResponse::from_json(r#"{"id":"3","error":"denied"}"#).unwrap();
        assert_eq!(failed.result, "");
        assert_eq!(failed.error.as_deref(), Some("denied"));
    }

    #[test]
    fn test_request_ids_differ() {
        let a = generate_request_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, generate_request_id());
    }

    #[test]
    fn test_envelope_template() {
        let template = nostr_connect_template(REMOTE, "ciphertext");
        assert_eq!(template.kind, KIND_NOSTR_CONNECT);
        assert_eq!(template.tags, vec![vec!["p".to_string(), REMOTE.to_string()]]);
    }
}
