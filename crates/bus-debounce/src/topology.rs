use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::Topology;
use bus_core::config::DebounceConfig;

struct Seen {
    last_seen: Instant,
    is_bot: bool,
}

/// Tracks, per channel, who has spoken recently so the batcher can decide
/// whether a human is present and how many distinct participants are
/// active. Mirrors the presence bookkeeping `skynet-channels` keeps for
/// its heartbeat logic, scoped down to what the debounce decision needs.
pub struct TopologyTracker {
    channels: DashMap<String, DashMap<String, Seen>>,
    presence_window: Duration,
}

impl TopologyTracker {
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            channels: DashMap::new(),
            presence_window: Duration::from_secs_f64(config.human_presence_window_seconds),
        }
    }

    /// Record that `author` just spoke in `channel`.
    pub fn record(&self, channel: &str, author: &str, is_bot: bool) {
        let entry = self.channels.entry(channel.to_string()).or_default();
        entry.insert(author.to_string(), Seen { last_seen: Instant::now(), is_bot });
    }

    /// Current topology for `channel`, after pruning stale authors outside
    /// the presence window.
    pub fn detect(&self, channel: &str) -> Topology {
        let Some(authors) = self.channels.get(channel) else {
            return Topology::default();
        };
        let now = Instant::now();
        authors.retain(|_, seen| now.duration_since(seen.last_seen) <= self.presence_window);

        let participant_count = authors.len();
        let human_present = authors.iter().any(|entry| !entry.value().is_bot);
        Topology { participant_count, human_present }
    }
}
