use crate::config::AdminConfig;
use anyhow::Result;
use clap::Args;
use nostr::Event;
use nostr_client::{MetricsSampler, MetricsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::warn;

const PREVIEW_CHARS: usize = 80;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Relay URL or bare host
    pub relay: String,

    /// How long to sample before exiting
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,
}

pub async fn run(args: MonitorArgs, config: &AdminConfig) -> Result<()> {
    let session = super::connect(&args.relay, &config.session).await?;
    let sampler = MetricsSampler::start(Arc::clone(&session), config.sampler.clone());

    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;
    let deadline = sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!("{}", format_line(&sampler.snapshot()));
                if !session.is_connected() {
                    warn!(
                        "Connection lost: {}",
                        session.last_error().unwrap_or_else(|| "closed by relay".to_string())
                    );
                    break;
                }
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let snapshot = sampler.snapshot();
    sampler.stop();
    session.disconnect();

    println!();
    println!("Recent kind-1 events ({}):", snapshot.recent_events.len());
    for event in &snapshot.recent_events {
        println!("  {}", format_event(event));
    }
    Ok(())
}

fn format_sample(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.0}", v))
}

fn format_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "latency {} ms | uptime {} s | kind-1 {}/s | samples {}",
        format_sample(snapshot.latest_latency_ms()),
        format_sample(snapshot.latest_duration_s()),
        format_sample(snapshot.latest_event_count()),
        snapshot.duration_s.len()
    )
}

fn format_event(event: &Event) -> String {
    let author = event.pubkey.get(..8).unwrap_or(&event.pubkey);
    let first_line = event.content.lines().next().unwrap_or_default();
    let mut preview: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if first_line.chars().count() > PREVIEW_CHARS || event.content.lines().nth(1).is_some() {
        preview.push('…');
    }
    format!("{} {}: {}", event.created_at, author, preview)
}
