use crate::config::AdminConfig;
use anyhow::{Context, Result};
use clap::Args;
use nostr::{EventSigner, LocalSigner, whitelist_template};
use nostr_client::{
    BunkerSigner, DEFAULT_BUNKER_TIMEOUT, fetch_relay_information_logged, parse_bunker_input,
    supports_whitelist,
};
use tracing::{info, warn};

pub const MISSING_SIGNER: &str = "Provide --nsec, NOSTR_SECRET_KEY or --bunker";

#[derive(Args, Debug)]
pub struct WhitelistArgs {
    /// Relay URL or bare host
    pub relay: String,

    /// Pubkey to allow, as npub or hex (repeatable)
    #[arg(long = "pubkey", value_name = "PUBKEY", required_unless_present = "allow_all")]
    pub pubkeys: Vec<String>,

    /// Allow every pubkey to publish
    #[arg(long, conflicts_with = "pubkeys")]
    pub allow_all: bool,

    /// Signing key, as nsec or hex
    #[arg(long, env = "NOSTR_SECRET_KEY", hide_env_values = true)]
    pub nsec: Option<String>,

    /// Remote signer, as bunker://... or name@domain. Takes precedence over a key.
    #[arg(long, value_name = "BUNKER")]
    pub bunker: Option<String>,
}

pub async fn run(args: WhitelistArgs, config: &AdminConfig) -> Result<()> {
    // Build the template before touching the network so bad input fails fast.
    let template = whitelist_template(&args.pubkeys, args.allow_all)?;
    let signer = signer(&args, config).await?;
    let event = signer
        .sign(&template)
        .await
        .context("failed to sign whitelist event")?;

    let session = super::connect(&args.relay, &config.session).await?;
    match fetch_relay_information_logged(&args.relay, session.diagnostics()).await {
        Ok(relay_info) if !supports_whitelist(&relay_info) => warn!(
            "{} runs {}, which does not support the whitelist event",
            args.relay,
            relay_info.software.as_deref().unwrap_or("unknown software")
        ),
        Ok(_) => {}
        Err(e) => warn!("Could not fetch relay information: {}", e),
    }

    let result = session.publish(&event).await;
    session.disconnect();

    let confirmation = result.context("whitelist event was not accepted")?;
    info!("Whitelist event {} accepted", confirmation.event_id);
    println!("{}", confirmation.event_id);
    if !confirmation.message.is_empty() {
        println!("{}", confirmation.message);
    }
    Ok(())
}

async fn signer(args: &WhitelistArgs, config: &AdminConfig) -> Result<Box<dyn EventSigner>> {
    if let Some(input) = &args.bunker {
        let bunker = parse_bunker_input(input).await?;
        let signer =
            BunkerSigner::connect_with(bunker, config.session.clone(), DEFAULT_BUNKER_TIMEOUT)
                .await
                .context("remote signer unavailable")?;
        info!("Signing as {} via remote signer", signer.public_key());
        return Ok(Box::new(signer));
    }

    let nsec = args.nsec.as_deref().context(MISSING_SIGNER)?;
    Ok(Box::new(
        LocalSigner::parse(nsec).context("invalid signing key")?,
    ))
}
