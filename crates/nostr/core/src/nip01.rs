//! NIP-01: event structure, id hashing, signing and verification.
//!
//! An event's `id` is the sha256 of `[0, pubkey, created_at, kind, tags, content]`
//! and the signature is a BIP-340 Schnorr signature over that id. Two events are
//! the same event when their ids match, so `PartialEq` and `Hash` only look at `id`.

use bitcoin::hashes::{Hash, sha256};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Short text note.
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;

/// Relay whitelist administration event (ephemeral range, `d` tag `whitelist`).
pub const KIND_RELAY_WHITELIST: u16 = 25000;

/// Errors that can occur while building, signing or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Event {
    /// Check the id against the content and the signature against the pubkey.
    pub fn verify(&self) -> Result<bool, Nip01Error> {
        verify_event(self)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

/// An event with a known author but no id or signature yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Event fields chosen by the caller; the pubkey comes from whoever signs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time.
    pub fn now(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        }
    }

    /// Attach an author.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Random secret key valid on secp256k1.
pub fn generate_secret_key() -> [u8; 32] {
    let mut rng = rand::rng();
    loop {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        if SecretKey::from_slice(&key).is_ok() {
            return key;
        }
    }
}

/// Derive the x-only public key (hex) for a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

/// Serialize an unsigned event for hashing.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Compute the event id.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Sign a template with a secret key.
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();

    let unsigned = template.clone().into_unsigned(hex::encode(xonly.serialize()));
    let id = get_event_hash(&unsigned)?;

    let digest = hex::decode(&id).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let message =
        Message::from_digest_slice(&digest).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// Structurally invalid events verify as `false`; an error means the
/// signature material could not be decoded at all.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    if !is_lower_hex(&event.id, 64) || !is_lower_hex(&event.pubkey, 64) || event.sig.len() != 128 {
        return Ok(false);
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    if get_event_hash(&unsigned)? != event.id {
        return Ok(false);
    }

    let digest = hex::decode(&event.id).map_err(|e| Nip01Error::Verification(e.to_string()))?;
    let message =
        Message::from_digest_slice(&digest).map_err(|e| Nip01Error::Verification(e.to_string()))?;
    let sig_bytes =
        hex::decode(&event.sig).map_err(|e| Nip01Error::Verification(e.to_string()))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| Nip01Error::Verification(e.to_string()))?;
    let pubkey_bytes =
        hex::decode(&event.pubkey).map_err(|e| Nip01Error::Verification(e.to_string()))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| Nip01Error::Verification(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

pub(crate) fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
