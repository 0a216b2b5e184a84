//! Relay whitelist administration event (kind 25000).
//!
//! Content is either `{"allowed_pubkeys":[...]}` or
//! `{"allowed_pubkeys":[],"allow_all":true}`, tagged `[["d","whitelist"]]`.

use crate::nip01::{EventTemplate, KIND_RELAY_WHITELIST, is_lower_hex};
use crate::nip19::npub_to_public_key;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WHITELIST_D_TAG: &str = "whitelist";

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("At least one valid pubkey required or enable \"Allow all\"")]
    Empty,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Turn an operator-entered pubkey (`npub1...` or hex) into lowercase hex.
pub fn normalize_pubkey(input: &str) -> Option<String> {
    let input = input.trim();
    if input.starts_with("npub1") {
        return npub_to_public_key(input).ok().map(hex::encode);
    }

    let lower = input.to_ascii_lowercase();
    is_lower_hex(&lower, 64).then_some(lower)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistContent {
    pub allowed_pubkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_all: bool,
}

impl WhitelistContent {
    pub fn allow_all() -> Self {
        Self {
            allowed_pubkeys: Vec::new(),
            allow_all: true,
        }
    }

    /// Normalize each entry, silently dropping the ones that don't parse.
    /// Duplicates are removed; first occurrence wins.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, WhitelistError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed_pubkeys: Vec<String> = Vec::new();
        for pubkey in entries.into_iter().filter_map(|e| normalize_pubkey(e.as_ref())) {
            if !allowed_pubkeys.contains(&pubkey) {
                allowed_pubkeys.push(pubkey);
            }
        }

        if allowed_pubkeys.is_empty() {
            return Err(WhitelistError::Empty);
        }

        Ok(Self {
            allowed_pubkeys,
            allow_all: false,
        })
    }

    pub fn to_template(&self) -> Result<EventTemplate, WhitelistError> {
        Ok(EventTemplate::now(
            KIND_RELAY_WHITELIST,
            vec![vec!["d".to_string(), WHITELIST_D_TAG.to_string()]],
            serde_json::to_string(self)?,
        ))
    }
}

/// Build the unsigned whitelist event.
///
/// With `allow_all` set the entries are ignored.
pub fn whitelist_template<I, S>(entries: I, allow_all: bool) -> Result<EventTemplate, WhitelistError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let content = if allow_all {
        WhitelistContent::allow_all()
    } else {
        WhitelistContent::from_entries(entries)?
    };
    content.to_template()
}
