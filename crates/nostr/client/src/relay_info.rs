//! NIP-11: Relay Information Document
//!
//! Fetched over HTTP(S) with `Accept: application/nostr+json`. Every field is
//! optional on input; relays publish wildly different subsets.

use crate::diagnostics::DiagnosticLog;
use crate::error::{ClientError, Result};
use crate::relay_url::to_http_url;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the whole metadata lookup may take, fallback included.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Diagnostic log source for metadata lookups.
pub const NIP11_SOURCE: &str = "NIP-11";

/// Relay software known not to implement the kind 25000 whitelist event.
pub const RELAY_SOFTWARE_WITHOUT_WHITELIST: &[&str] = &["nostr-rs-relay"];

/// NIP-11 Relay Information Document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayInformation {
    /// Relay name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Banner image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    /// Icon image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Administrative contact pubkey (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,

    /// Administrative contact (URI: mailto:, https:, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_nips: Option<Vec<u16>>,

    /// Relay software URL or name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limitation: Option<Limitation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<Vec<RetentionPolicy>>,

    /// Relay country codes (ISO 3166-1 alpha-2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_countries: Option<Vec<String>>,

    /// Language tags (IETF)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_tags: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Posting policy URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posting_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<Fees>,
}

/// Server limitations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limitation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_filters: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subid_length: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<u64>,

    /// Minimum PoW difficulty (NIP-13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<u32>,

    /// Authentication required (NIP-42)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_writes: Option<bool>,
}

/// Event retention policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Event kinds (or ranges) this policy applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<KindOrRange>>,

    /// Retention time in seconds (null = infinity, 0 = no storage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Kind number or range [start, end]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KindOrRange {
    Single(u16),
    Range(u16, u16),
}

/// Fee schedules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fees {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<Vec<FeeSchedule>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Vec<FeeSchedule>>,

    /// Publication fees (per event)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<Vec<FeeSchedule>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub amount: u64,

    /// Unit (sats, msats, etc.)
    pub unit: String,

    /// Period in seconds (for subscriptions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
}

impl RelayInformation {
    pub fn supports_nip(&self, nip: u16) -> bool {
        self.supported_nips
            .as_ref()
            .is_some_and(|nips| nips.contains(&nip))
    }
}

/// Whether the relay is expected to honour the kind 25000 whitelist event.
///
/// Unknown software is assumed to support it.
pub fn supports_whitelist(info: &RelayInformation) -> bool {
    let Some(software) = info.software.as_deref().map(str::trim) else {
        return true;
    };
    if software.is_empty() {
        return true;
    }

    let slug = software
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    !RELAY_SOFTWARE_WITHOUT_WHITELIST
        .iter()
        .any(|name| slug.contains(name))
}

/// Fetch a relay's NIP-11 document, falling back to
/// `/.well-known/nostr.json` when `/` answers 404.
pub async fn fetch_relay_information(relay_url: &str) -> Result<RelayInformation> {
    fetch_relay_information_with_timeout(relay_url, METADATA_TIMEOUT).await
}

pub async fn fetch_relay_information_with_timeout(
    relay_url: &str,
    timeout: Duration,
) -> Result<RelayInformation> {
    if relay_url.trim().is_empty() {
        return Err(ClientError::InvalidUrl("Relay URL is required".to_string()));
    }

    let base = to_http_url(relay_url);
    match tokio::time::timeout(timeout, fetch_document(&base)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Http("Timeout fetching metadata".to_string())),
    }
}

/// [`fetch_relay_information`] that records a failure in `log`.
pub async fn fetch_relay_information_logged(
    relay_url: &str,
    log: &DiagnosticLog,
) -> Result<RelayInformation> {
    let result = fetch_relay_information(relay_url).await;
    if let Err(e) = &result {
        warn!("Relay information for {} unavailable: {}", relay_url, e);
        log.error(
            format!("Failed to fetch relay information: {}", e),
            Some(NIP11_SOURCE),
        );
    }
    result
}

async fn fetch_document(base: &str) -> Result<RelayInformation> {
    let client = reqwest::Client::new();

    info!("Fetching relay information from {}/", base);
    let mut response = get_nostr_json(&client, &format!("{}/", base)).await?;

    if response.status() == StatusCode::NOT_FOUND {
        debug!("{}/ returned 404, trying well-known path", base);
        response = get_nostr_json(&client, &format!("{}/.well-known/nostr.json", base)).await?;
    }

    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Http(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )));
    }

    let body = response.bytes().await.map_err(http_error)?;
    Ok(serde_json::from_slice(&body)?)
}

async fn get_nostr_json(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/nostr+json")
        .send()
        .await
        .map_err(http_error)
}

fn http_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Http("Timeout fetching metadata".to_string())
    } else {
        ClientError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_partial_document() {
        let info: RelayInformation = serde_json::from_str(
            r#"{
                "name": "test relay",
                "supported_nips": [1, 11, 45],
                "software": "git+https://github.com/hoytech/strfry.git",
                "limitation": {"max_limit": 500, "auth_required": false},
                "retention": [{"kinds": [0, [5, 7]], "time": 3600}],
                "fees": {"admission": [{"amount": 1000000, "unit": "msats"}]},
                "unknown_field": true
            }"#,
        )
        .unwrap();

        assert_eq!(info.name.as_deref(), Some("test relay"));
        assert!(info.supports_nip(45));
        assert!(!info.supports_nip(42));
        assert_eq!(info.limitation.as_ref().unwrap().max_limit, Some(500));
        assert_eq!(
            info.retention.as_ref().unwrap()[0].kinds,
            Some(vec![KindOrRange::Single(0), KindOrRange::Range(5, 7)])
        );
        assert_eq!(info.fees.unwrap().admission.unwrap()[0].unit, "msats");
    }

    #[test]
    fn test_empty_document() {
        let info: RelayInformation = serde_json::from_str("{}").unwrap();
        assert_eq!(info, RelayInformation::default());
        assert_eq!(serde_json::to_string(&info).unwrap(), "{}");
    }

    #[test]
    fn test_supports_whitelist() {
        let with = |software: Option<&str>| RelayInformation {
            software: software.map(str::to_string),
            ..Default::default()
        };

        assert!(supports_whitelist(&with(None)));
        assert!(supports_whitelist(&with(Some("  "))));
        assert!(supports_whitelist(&with(Some("https://github.com/hoytech/strfry"))));
        assert!(!supports_whitelist(&with(Some(
            "https://git.sr.ht/~gheartsfield/nostr-rs-relay"
        ))));
        assert!(!supports_whitelist(&with(Some("Nostr-RS-Relay"))));
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        assert!(matches!(
            fetch_relay_information("  ").await,
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
