//! Nostr relay session client for relay administration.
//!
//! This crate provides:
//! - NIP-01 message encoding and tolerant decoding
//! - a correlation table multiplexing requests and subscriptions over one socket
//! - [`RelaySession`]: connect, publish, count, round-trip probes, subscriptions
//! - [`MetricsSampler`]: latency, uptime and kind-1 activity series
//! - NIP-11 relay information discovery
//! - [`BunkerSigner`]: NIP-46 remote signing over a session
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{Filter, MetricsSampler, RelaySession, SamplerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let session = Arc::new(RelaySession::new());
//!     session.connect("relay.example.com").await?;
//!
//!     let sampler = MetricsSampler::start(Arc::clone(&session), SamplerConfig::default());
//!
//!     match session.count(Filter::new().kinds(vec![1])).await {
//!         Some(n) => println!("{} notes", n),
//!         None => println!("count unknown"),
//!     }
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     println!("{:?}", sampler.snapshot().latency_ms);
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

mod bunker;
mod config;
mod diagnostics;
mod error;
mod message;
mod metrics;
mod multiplexer;
mod relay_info;
mod relay_url;
mod sampler;
mod session;
mod subscription;

pub use bunker::{
    BunkerSigner, DEFAULT_BUNKER_TIMEOUT, INVALID_BUNKER_INPUT, bunker_from_nip05, nip05_lookup_url,
    parse_bunker_input,
};
pub use config::{SamplerConfig, SessionConfig};
pub use diagnostics::{DiagnosticLog, LogEntry, LogLevel};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, FrameKind, MessageError, RelayMessage};
pub use metrics::{MetricsSnapshot, RecentEvents, SampleSeries};
pub use multiplexer::{EventCallback, Multiplexer, PendingRequest, Registration};
pub use relay_info::{
    FeeSchedule, Fees, KindOrRange, Limitation, METADATA_TIMEOUT, NIP11_SOURCE,
    RELAY_SOFTWARE_WITHOUT_WHITELIST, RelayInformation, RetentionPolicy, fetch_relay_information,
    fetch_relay_information_logged, fetch_relay_information_with_timeout, supports_whitelist,
};
pub use relay_url::{normalize_relay_url, to_http_url};
pub use sampler::MetricsSampler;
pub use session::{PublishConfirmation, RelaySession, SessionState, SessionStatus};
pub use subscription::{Subscription, generate_subscription_id};
