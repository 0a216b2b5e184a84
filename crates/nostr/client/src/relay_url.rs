//! Relay address rules.
//!
//! Operators type bare hostnames; the socket needs `ws://` or `wss://`, and
//! NIP-11 needs the matching `http://` or `https://` address.

use crate::error::{ClientError, Result};
use url::Url;

/// Normalize operator input into a WebSocket URL. Bare hosts get `wss://`.
pub fn normalize_relay_url(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ClientError::InvalidUrl("relay URL is empty".to_string()));
    }

    let candidate = if input.contains("://") {
        input.to_string()
    } else {
        format!("wss://{}", input)
    };

    let url = Url::parse(&candidate)?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ClientError::InvalidUrl(format!(
            "URL must use ws:// or wss:// scheme, got: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::InvalidUrl(format!("no host in {}", input)));
    }

    Ok(candidate)
}

/// The HTTP(S) address that serves a relay's NIP-11 document.
pub fn to_http_url(relay_url: &str) -> String {
    let relay_url = relay_url.trim();
    let http = if let Some(rest) = relay_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = relay_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if relay_url.starts_with("https://") || relay_url.starts_with("http://") {
        relay_url.to_string()
    } else {
        format!("https://{}", relay_url)
    };
    http.trim_end_matches('/').to_string()
}
