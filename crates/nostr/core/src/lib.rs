//! Nostr protocol pieces needed to administer a relay.
//!
//! This crate provides:
//! - NIP-01: events, id hashing, signing and verification
//! - NIP-19: `nsec`/`npub` bech32 keys
//! - NIP-44: versioned encryption (v2)
//! - NIP-46: remote signer ("bunker") URLs and messages
//! - an [`EventSigner`] seam with an in-memory [`LocalSigner`]
//! - the kind 25000 relay whitelist event
//!
//! # Example
//!
//! ```
//! use nostr::{LocalSigner, whitelist_template};
//!
//! let signer = LocalSigner::parse(
//!     "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a",
//! ).unwrap();
//! let template = whitelist_template(Vec::<String>::new(), true).unwrap();
//! let event = signer.finalize(&template).unwrap();
//! assert!(event.verify().unwrap());
//! ```

mod nip01;
mod nip19;
pub mod nip44;
pub mod nip46;
mod signer;
mod whitelist;

pub use nip01::{
    Event, EventTemplate, KIND_RELAY_WHITELIST, KIND_SHORT_TEXT_NOTE, Nip01Error, UnsignedEvent,
    finalize_event, generate_secret_key, get_event_hash, get_public_key_hex, serialize_event,
    unix_now, verify_event,
};
pub use nip44::{
    Nip44Error, decrypt as decrypt_v2, encrypt as encrypt_v2, get_conversation_key,
};
pub use nip46::{
    BunkerUrl, KIND_NOSTR_CONNECT, Nip46Error, NostrConnectMethod, NostrConnectRequest,
    NostrConnectResponse, generate_request_id, is_nostr_connect_event, nostr_connect_template,
};
pub use nip19::{
    Nip19Error, npub_to_public_key, nsec_to_secret_key, public_key_to_npub, secret_key_to_nsec,
};
pub use signer::{EventSigner, LocalSigner, SignerError};
pub use whitelist::{
    WHITELIST_D_TAG, WhitelistContent, WhitelistError, normalize_pubkey, whitelist_template,
};
