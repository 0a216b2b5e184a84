use anyhow::{Context, Result};
use clap::Args;
use nostr_client::{fetch_relay_information, supports_whitelist};
use tracing::warn;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Relay URL or bare host
    pub relay: String,
}

pub async fn run(args: InfoArgs) -> Result<()> {
    let info = fetch_relay_information(&args.relay)
        .await
        .with_context(|| format!("failed to fetch relay information for {}", args.relay))?;

    println!("{}", serde_json::to_string_pretty(&info)?);
    if !supports_whitelist(&info) {
        warn!("Relay software does not support the whitelist event");
    }
    Ok(())
}
