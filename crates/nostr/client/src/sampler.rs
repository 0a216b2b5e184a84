//! Periodic liveness and activity sampling.
//!
//! A supervisor task follows the session status. While the session is
//! `Connected` it keeps a kind-1 subscription open and ticks once per interval:
//! uptime goes into the duration series, a round-trip probe feeds the latency
//! series, and the per-tick kind-1 counter is flushed into the count series.
//! Leaving `Connected` stops the ticker and closes the subscription. Snapshots
//! only report series for the connection currently being sampled, so they read
//! empty as soon as the session leaves `Connected`.

use crate::config::SamplerConfig;
use crate::message::Filter;
use crate::metrics::{MetricsSnapshot, RecentEvents, SampleSeries};
use crate::session::{RelaySession, SessionState, SessionStatus};
use nostr::KIND_SHORT_TEXT_NOTE;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

struct Series {
    latency_ms: SampleSeries,
    duration_s: SampleSeries,
    event_counts: SampleSeries,
    recent: RecentEvents,
}

struct Metrics {
    series: Mutex<Series>,
    events_this_tick: AtomicU64,
    // Epoch the series belong to; 0 while none.
    sampled_epoch: AtomicU64,
}

impl Metrics {
    fn new(config: &SamplerConfig) -> Self {
        Self {
            series: Mutex::new(Series {
                latency_ms: SampleSeries::new(config.series_capacity),
                duration_s: SampleSeries::new(config.series_capacity),
                event_counts: SampleSeries::new(config.series_capacity),
                recent: RecentEvents::new(config.recent_events),
            }),
            events_this_tick: AtomicU64::new(0),
            sampled_epoch: AtomicU64::new(0),
        }
    }

    /// Start a fresh sampling window for `epoch`.
    fn begin(&self, epoch: u64) {
        let mut series = self.series.lock();
        series.latency_ms.clear();
        series.duration_s.clear();
        series.event_counts.clear();
        series.recent.clear();
        self.events_this_tick.store(0, Ordering::SeqCst);
        self.sampled_epoch.store(epoch, Ordering::SeqCst);
    }

    // Recent events stay visible until the next connection is sampled.
    fn reset(&self) {
        let mut series = self.series.lock();
        series.latency_ms.clear();
        series.duration_s.clear();
        series.event_counts.clear();
        self.events_this_tick.store(0, Ordering::SeqCst);
        self.sampled_epoch.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self, status: SessionStatus) -> MetricsSnapshot {
        let series = self.series.lock();
        let live = status.state == SessionState::Connected
            && status.epoch == self.sampled_epoch.load(Ordering::SeqCst);
        if !live {
            return MetricsSnapshot {
                recent_events: series.recent.to_vec(),
                ..MetricsSnapshot::default()
            };
        }

        MetricsSnapshot {
            latency_ms: series.latency_ms.values(),
            duration_s: series.duration_s.values(),
            event_counts: series.event_counts.values(),
            recent_events: series.recent.to_vec(),
        }
    }
}

/// Background sampler bound to one session. Stops when dropped.
pub struct MetricsSampler {
    session: Arc<RelaySession>,
    metrics: Arc<Metrics>,
    task: JoinHandle<()>,
}

impl MetricsSampler {
    pub fn start(session: Arc<RelaySession>, config: SamplerConfig) -> Self {
        let metrics = Arc::new(Metrics::new(&config));
        let task = tokio::spawn(supervise(
            Arc::clone(&session),
            config,
            Arc::clone(&metrics),
        ));
        Self {
            session,
            metrics,
            task,
        }
    }

    /// Series are empty unless the session is connected and being sampled.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.session.status())
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn supervise(session: Arc<RelaySession>, config: SamplerConfig, metrics: Arc<Metrics>) {
    let mut status_rx = session.watch_status();
    loop {
        let status = *status_rx.borrow_and_update();
        if status.state == SessionState::Connected {
            sample_connection(&session, &config, &metrics, status.epoch, &mut status_rx).await;
            metrics.reset();
            debug!("Sampling stopped for epoch {}", status.epoch);
            continue;
        }

        if status_rx.changed().await.is_err() {
            break;
        }
    }
}

async fn sample_connection(
    session: &Arc<RelaySession>,
    config: &SamplerConfig,
    metrics: &Arc<Metrics>,
    epoch: u64,
    status_rx: &mut watch::Receiver<SessionStatus>,
) {
    info!("Sampling relay metrics (epoch {})", epoch);
    metrics.begin(epoch);

    let on_event = {
        let metrics = Arc::clone(metrics);
        move |event: nostr::Event| {
            if event.kind == KIND_SHORT_TEXT_NOTE {
                metrics.events_this_tick.fetch_add(1, Ordering::SeqCst);
                metrics.series.lock().recent.push(event);
            }
        }
    };
    let _subscription = session.subscribe(
        Filter::new()
            .kinds(vec![KIND_SHORT_TEXT_NOTE])
            .limit(config.event_subscription_limit),
        on_event,
    );

    let period = config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Dropping the set aborts probes still in flight.
    let mut probes = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick(session, metrics, epoch, &mut probes);
            }
            Some(_) = probes.join_next(), if !probes.is_empty() => {}
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let status = *status_rx.borrow();
                if status.state != SessionState::Connected || status.epoch != epoch {
                    return;
                }
            }
        }
    }
}

fn tick(session: &Arc<RelaySession>, metrics: &Arc<Metrics>, epoch: u64, probes: &mut JoinSet<()>) {
    let uptime = session.connected_at().map(|start| start.elapsed().as_secs_f64());
    let count = metrics.events_this_tick.swap(0, Ordering::SeqCst);
    {
        let mut series = metrics.series.lock();
        if let Some(uptime) = uptime {
            series.duration_s.push(uptime);
        }
        series.event_counts.push(count as f64);
    }

    let session = Arc::clone(session);
    let metrics = Arc::clone(metrics);
    probes.spawn(async move {
        let Some(ms) = session.probe_round_trip().await else {
            return;
        };
        let status = session.status();
        if status.epoch == epoch && status.state == SessionState::Connected {
            metrics.series.lock().latency_ms.push(ms as f64);
        } else {
            debug!("Dropping late probe result from epoch {}", epoch);
        }
    });
}
