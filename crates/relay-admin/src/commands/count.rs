use crate::config::AdminConfig;
use anyhow::Result;
use clap::Args;
use nostr_client::Filter;

#[derive(Args, Debug)]
pub struct CountArgs {
    /// Relay URL or bare host
    pub relay: String,

    /// Event kind to count (repeatable; all kinds when omitted)
    #[arg(long = "kind", value_name = "N")]
    pub kinds: Vec<u16>,
}

pub async fn run(args: CountArgs, config: &AdminConfig) -> Result<()> {
    let session = super::connect(&args.relay, &config.session).await?;

    let count = session.count(filter_for(args.kinds)).await;
    session.disconnect();

    println!("{}", format_count(count));
    Ok(())
}

fn filter_for(kinds: Vec<u16>) -> Filter {
    if kinds.is_empty() {
        Filter::new()
    } else {
        Filter::new().kinds(kinds)
    }
}

fn format_count(count: Option<u64>) -> String {
    count.map_or_else(|| "unknown".to_string(), |n| n.to_string())
}
