//! Sliding-window metric storage.

use nostr::Event;
use serde::Serialize;
use std::collections::VecDeque;

/// Fixed-capacity series; pushing past capacity evicts the oldest sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl SampleSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

/// Newest-first list of recent events, unique by id.
#[derive(Debug, Clone)]
pub struct RecentEvents {
    capacity: usize,
    events: VecDeque<Event>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns false if an event with the same id is already kept.
    pub fn push(&mut self, event: Event) -> bool {
        if self.capacity == 0 || self.events.contains(&event) {
            return false;
        }
        self.events.push_front(event);
        self.events.truncate(self.capacity);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }
}

/// Point-in-time copy of everything the sampler tracks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Round-trip latency in milliseconds, oldest first
    pub latency_ms: Vec<f64>,
    /// Connection uptime in seconds at each tick
    pub duration_s: Vec<f64>,
    /// Kind-1 events received per tick
    pub event_counts: Vec<f64>,
    /// Most recent kind-1 events, newest first
    pub recent_events: Vec<Event>,
}

impl MetricsSnapshot {
    pub fn latest_latency_ms(&self) -> Option<f64> {
        self.latency_ms.last().copied()
    }

    pub fn latest_duration_s(&self) -> Option<f64> {
        self.duration_s.last().copied()
    }

    pub fn latest_event_count(&self) -> Option<f64> {
        self.event_counts.last().copied()
    }

    pub fn total_events(&self) -> f64 {
        self.event_counts.iter().sum()
    }
}
