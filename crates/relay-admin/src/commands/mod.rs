pub mod count;
pub mod info;
pub mod monitor;
pub mod whitelist;

use anyhow::{Context, Result};
use nostr_client::{RelaySession, SessionConfig};
use std::sync::Arc;

/// Open a session to `relay` with the configured timeouts.
pub(crate) async fn connect(relay: &str, config: &SessionConfig) -> Result<Arc<RelaySession>> {
    let session = Arc::new(RelaySession::with_config(config.clone()));
    session
        .connect(relay)
        .await
        .with_context(|| format!("failed to connect to {}", relay))?;
    if let Some(url) = session.url() {
        tracing::info!("Connected to {}", url);
    }
    Ok(session)
}
