//! NIP-19: bech32-encoded keys (`nsec`, `npub`).

use bech32::{Bech32, Hrp};
use thiserror::Error;

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

#[derive(Debug, Error)]
pub enum Nip19Error {
    #[error("bech32 encoding error: {0}")]
    Encode(String),

    #[error("bech32 decoding error: {0}")]
    Decode(String),

    #[error("invalid hrp: expected {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Decode an `nsec1...` string to a secret key.
pub fn nsec_to_secret_key(nsec: &str) -> Result<[u8; 32], Nip19Error> {
    decode(NSEC_HRP, nsec)
}

/// Decode an `npub1...` string to an x-only public key.
pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32], Nip19Error> {
    decode(NPUB_HRP, npub)
}

pub fn secret_key_to_nsec(secret_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode(NSEC_HRP, secret_key)
}

pub fn public_key_to_npub(public_key: &[u8; 32]) -> Result<String, Nip19Error> {
    encode(NPUB_HRP, public_key)
}

fn encode(hrp: &str, data: &[u8; 32]) -> Result<String, Nip19Error> {
    let hrp = Hrp::parse(hrp).map_err(|e| Nip19Error::Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Nip19Error::Encode(e.to_string()))
}

fn decode(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], Nip19Error> {
    let expected = Hrp::parse(expected_hrp).map_err(|e| Nip19Error::Decode(e.to_string()))?;
    let (hrp, data) = bech32::decode(encoded).map_err(|e| Nip19Error::Decode(e.to_string()))?;

    if hrp != expected {
        return Err(Nip19Error::InvalidHrp {
            expected: expected_hrp.to_string(),
            got: hrp.to_string(),
        });
    }

    <[u8; 32]>::try_from(data.as_slice()).map_err(|_| Nip19Error::InvalidLength(data.len()))
}
