//! Signing seam between operator credentials and the relay client.
//!
//! The client never sees key material. It receives finished events from an
//! [`EventSigner`]; `nostr-client` implements the same trait over NIP-46.

use crate::nip01::{
    Event, EventTemplate, Nip01Error, finalize_event, generate_secret_key, get_public_key_hex,
};
use crate::nip19::{Nip19Error, nsec_to_secret_key};
use crate::nip44::{self, Nip44Error};
use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Nip19(#[from] Nip19Error),

    #[error(transparent)]
    Nip01(#[from] Nip01Error),

    #[error(transparent)]
    Nip44(#[from] Nip44Error),

    #[error("remote signer: {0}")]
    Remote(String),
}

/// Something that can author events.
#[async_trait]
pub trait EventSigner: Send + Sync {
    /// Hex public key events will be signed with.
    fn public_key(&self) -> &str;

    /// Produce a signed event from a template.
    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError>;
}

/// Signs with a secret key held in memory.
pub struct LocalSigner {
    secret_key: Zeroizing<[u8; 32]>,
    public_key: String,
}

impl LocalSigner {
    pub fn from_secret_key(secret_key: [u8; 32]) -> Result<Self, SignerError> {
        let public_key = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key: Zeroizing::new(secret_key),
            public_key,
        })
    }

    /// Accepts `nsec1...` or 64 hex characters.
    pub fn parse(input: &str) -> Result<Self, SignerError> {
        let input = input.trim();
        if input.starts_with("nsec1") {
            return Self::from_secret_key(nsec_to_secret_key(input)?);
        }

        let bytes = hex::decode(input).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let key = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| SignerError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Self::from_secret_key(key)
    }

    /// Fresh random key, e.g. the throwaway client key of a NIP-46 session.
    pub fn generate() -> Result<Self, SignerError> {
        Self::from_secret_key(generate_secret_key())
    }

    pub fn finalize(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        Ok(finalize_event(template, &self.secret_key)?)
    }

    /// NIP-44 v2 encrypt to a hex pubkey.
    pub fn nip44_encrypt(&self, peer_pubkey: &str, plaintext: &str) -> Result<String, SignerError> {
        let peer = decode_pubkey(peer_pubkey)?;
        Ok(nip44::encrypt(&self.secret_key, &peer, plaintext)?)
    }

    /// NIP-44 v2 decrypt a payload from a hex pubkey.
    pub fn nip44_decrypt(&self, peer_pubkey: &str, payload: &str) -> Result<String, SignerError> {
        let peer = decode_pubkey(peer_pubkey)?;
        Ok(nip44::decrypt(&self.secret_key, &peer, payload)?)
    }
}

fn decode_pubkey(hex_key: &str) -> Result<Vec<u8>, SignerError> {
    hex::decode(hex_key).map_err(|e| SignerError::Nip44(Nip44Error::InvalidKey(e.to_string())))
}

#[async_trait]
impl EventSigner for LocalSigner {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    async fn sign(&self, template: &EventTemplate) -> Result<Event, SignerError> {
        self.finalize(template)
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
