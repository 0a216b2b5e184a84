//! NIP-44: Versioned Encryption (v2)
//!
//! - secp256k1 ECDH shared x coordinate
//! - HKDF-SHA256 (salt `nip44-v2`) for the conversation key
//! - per-message ChaCha20 key, nonce and HMAC key expanded from a random nonce
//! - payload: base64(`version || nonce || ciphertext || mac`)
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/44.md>

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::secp256k1::{PublicKey, SecretKey, ecdh};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Payload version byte
pub const VERSION: u8 = 2;

pub const NONCE_SIZE: usize = 32;
pub const MAC_SIZE: usize = 32;
pub const CHACHA_KEY_SIZE: usize = 32;
pub const CHACHA_NONCE_SIZE: usize = 12;
pub const HMAC_KEY_SIZE: usize = 32;

pub const MIN_PLAINTEXT_LEN: usize = 1;
pub const MAX_PLAINTEXT_LEN: usize = 65535;
pub const MIN_PADDED_LEN: usize = 32;

const SALT: &[u8] = b"nip44-v2";
const MIN_PAYLOAD_LEN: usize = 132;
const MAX_PAYLOAD_LEN: usize = 87472;
const MIN_DECODED_LEN: usize = 99;
const MAX_DECODED_LEN: usize = 65603;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum Nip44Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid plaintext length: {0}")]
    InvalidPlaintextLength(usize),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown encryption version: {0}")]
    UnknownVersion(u8),

    #[error("invalid MAC")]
    InvalidMac,

    #[error("invalid padding")]
    InvalidPadding,
}

/// Symmetric key shared by `secret_key` and the owner of `public_key`.
///
/// `public_key` may be 32-byte x-only or 33-byte compressed.
pub fn get_conversation_key(
    secret_key: &[u8; 32],
    public_key: &[u8],
) -> Result<[u8; 32], Nip44Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    let pk = parse_public_key(public_key)?;
    let point = ecdh::shared_secret_point(&pk, &sk);

    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), &point[..32]);
    let mut key = [0u8; 32];
    key.copy_from_slice(&prk);
    Ok(key)
}

/// Encrypt `plaintext` from `secret_key` to `public_key`.
pub fn encrypt(
    secret_key: &[u8; 32],
    public_key: &[u8],
    plaintext: &str,
) -> Result<String, Nip44Error> {
    let conversation_key = get_conversation_key(secret_key, public_key)?;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    encrypt_with_nonce(&conversation_key, plaintext, &nonce)
}

/// Decrypt a payload sent to `secret_key` by `public_key`.
pub fn decrypt(
    secret_key: &[u8; 32],
    public_key: &[u8],
    payload: &str,
) -> Result<String, Nip44Error> {
    let conversation_key = get_conversation_key(secret_key, public_key)?;
    decrypt_with_conversation_key(&conversation_key, payload)
}

pub fn encrypt_with_nonce(
    conversation_key: &[u8; 32],
    plaintext: &str,
    nonce: &[u8; NONCE_SIZE],
) -> Result<String, Nip44Error> {
    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, nonce)?;

    let mut buf = pad(plaintext)?;
    apply_keystream(&chacha_key, &chacha_nonce, &mut buf)?;
    let mac = authenticator(&hmac_key, nonce, &buf)?.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + buf.len() + MAC_SIZE);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&mac);
    Ok(BASE64.encode(payload))
}

pub fn decrypt_with_conversation_key(
    conversation_key: &[u8; 32],
    payload: &str,
) -> Result<String, Nip44Error> {
    if payload.starts_with('#') {
        return Err(Nip44Error::InvalidPayload("unsupported encoding".to_string()));
    }
    if !(MIN_PAYLOAD_LEN..=MAX_PAYLOAD_LEN).contains(&payload.len()) {
        return Err(Nip44Error::InvalidPayload(format!(
            "invalid payload length: {}",
            payload.len()
        )));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| Nip44Error::InvalidPayload(e.to_string()))?;
    if !(MIN_DECODED_LEN..=MAX_DECODED_LEN).contains(&data.len()) {
        return Err(Nip44Error::InvalidPayload(format!(
            "invalid data length: {}",
            data.len()
        )));
    }
    if data[0] != VERSION {
        return Err(Nip44Error::UnknownVersion(data[0]));
    }

    let nonce = &data[1..1 + NONCE_SIZE];
    let ciphertext = &data[1 + NONCE_SIZE..data.len() - MAC_SIZE];
    let mac = &data[data.len() - MAC_SIZE..];

    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, nonce)?;
    authenticator(&hmac_key, nonce, ciphertext)?
        .verify_slice(mac)
        .map_err(|_| Nip44Error::InvalidMac)?;

    let mut buf = ciphertext.to_vec();
    apply_keystream(&chacha_key, &chacha_nonce, &mut buf)?;
    unpad(&buf)
}

fn parse_public_key(public_key: &[u8]) -> Result<PublicKey, Nip44Error> {
    let result = match public_key.len() {
        32 => {
            let mut compressed = [0u8; 33];
            compressed[0] = 0x02;
            compressed[1..].copy_from_slice(public_key);
            PublicKey::from_slice(&compressed)
        }
        _ => PublicKey::from_slice(public_key),
    };
    result.map_err(|e| Nip44Error::InvalidKey(e.to_string()))
}

fn message_keys(
    conversation_key: &[u8; 32],
    nonce: &[u8],
) -> Result<([u8; CHACHA_KEY_SIZE], [u8; CHACHA_NONCE_SIZE], [u8; HMAC_KEY_SIZE]), Nip44Error> {
    let hkdf = Hkdf::<Sha256>::from_prk(conversation_key)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    let mut okm = [0u8; CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE + HMAC_KEY_SIZE];
    hkdf.expand(nonce, &mut okm)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;

    let mut chacha_key = [0u8; CHACHA_KEY_SIZE];
    let mut chacha_nonce = [0u8; CHACHA_NONCE_SIZE];
    let mut hmac_key = [0u8; HMAC_KEY_SIZE];
    chacha_key.copy_from_slice(&okm[..CHACHA_KEY_SIZE]);
    chacha_nonce.copy_from_slice(&okm[CHACHA_KEY_SIZE..CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE]);
    hmac_key.copy_from_slice(&okm[CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE..]);
    Ok((chacha_key, chacha_nonce, hmac_key))
}

fn apply_keystream(key: &[u8], nonce: &[u8], buf: &mut [u8]) -> Result<(), Nip44Error> {
    let mut cipher = ChaCha20::new_from_slices(key, nonce)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    cipher.apply_keystream(buf);
    Ok(())
}

fn authenticator(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, Nip44Error> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    mac.update(nonce);
    mac.update(ciphertext);
    Ok(mac)
}

fn calc_padded_len(len: usize) -> usize {
    if len <= MIN_PADDED_LEN {
        return MIN_PADDED_LEN;
    }
    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn pad(plaintext: &str) -> Result<Vec<u8>, Nip44Error> {
    let bytes = plaintext.as_bytes();
    let len = bytes.len();
    if !(MIN_PLAINTEXT_LEN..=MAX_PLAINTEXT_LEN).contains(&len) {
        return Err(Nip44Error::InvalidPlaintextLength(len));
    }

    let mut padded = Vec::with_capacity(2 + calc_padded_len(len));
    padded.extend_from_slice(&(len as u16).to_be_bytes());
    padded.extend_from_slice(bytes);
    padded.resize(2 + calc_padded_len(len), 0);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<String, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT_LEN || padded.len() != 2 + calc_padded_len(len) {
        return Err(Nip44Error::InvalidPadding);
    }
    String::from_utf8(padded[2..2 + len].to_vec())
        .map_err(|e| Nip44Error::InvalidPayload(e.to_string()))
}
