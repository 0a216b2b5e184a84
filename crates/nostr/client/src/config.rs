//! Session and sampler configuration
//!
//! Durations are stored as milliseconds so the structs round-trip through JSON
//! config files unchanged.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// How long to wait for the WebSocket handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long publish, count and probe wait for their terminal frame
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Limit applied to subscriptions whose filter has none
    #[serde(default = "default_subscription_limit")]
    pub default_subscription_limit: u64,

    /// Diagnostic log entries kept before the oldest is evicted
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_subscription_limit() -> u64 {
    10
}

fn default_log_capacity() -> usize {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            default_subscription_limit: default_subscription_limit(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Metrics sampler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerConfig {
    /// Tick period
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Samples kept per series
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,

    /// Recent kind-1 events kept for display
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,

    /// Limit on the live kind-1 subscription
    #[serde(default = "default_event_subscription_limit")]
    pub event_subscription_limit: u64,
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_series_capacity() -> usize {
    600
}

fn default_recent_events() -> usize {
    5
}

fn default_event_subscription_limit() -> u64 {
    20
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            series_capacity: default_series_capacity(),
            recent_events: default_recent_events(),
            event_subscription_limit: default_event_subscription_limit(),
        }
    }
}

impl SamplerConfig {
    /// Tick period, never shorter than one millisecond.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}
