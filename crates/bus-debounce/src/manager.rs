use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, instrument};

use bus_core::config::DebounceConfig;

use crate::topology::TopologyTracker;
use crate::types::BatchedMessage;

/// Invoked once a channel's pending batch is ready to be handed to the
/// dispatcher. Taking this as a plain callback value at construction
/// (rather than giving the batcher a handle back to the dispatcher)
/// avoids a cyclic ownership between the two crates.
pub type BatchReady = Arc<dyn Fn(String, Vec<BatchedMessage>) + Send + Sync>;

struct ChannelState {
    pending: Vec<BatchedMessage>,
    generation: u64,
    current_wait: f64,
    last_message_at: Instant,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            generation: 0,
            current_wait: 0.0,
            last_message_at: Instant::now(),
        }
    }
}

/// Coalesces bursts of inbound messages per channel into a single batch,
/// escalating the wait while messages keep arriving in quick succession.
///
/// Each channel's pending batch is drained by exactly one fired timer:
/// every enqueue bumps a per-channel generation counter and schedules a
/// timer tagged with that generation, so a timer that loses the race to a
/// newer message becomes a no-op instead of delivering a stale or
/// duplicate batch.
pub struct Batcher {
    channels: DashMap<String, Mutex<ChannelState>>,
    topology: TopologyTracker,
    config: DebounceConfig,
    on_ready: BatchReady,
}

impl Batcher {
    pub fn new(config: DebounceConfig, on_ready: BatchReady) -> Self {
        Self {
            channels: DashMap::new(),
            topology: TopologyTracker::new(&config),
            config,
            on_ready,
        }
    }

    /// Record a speaker's presence in `channel` without enqueueing a
    /// reply. Used for messages that update topology (§4.7's Idle→Idle
    /// transition) but are not themselves eligible for a batched reply.
    pub fn record_presence(&self, channel: &str, author: &str, is_bot: bool) {
        self.topology.record(channel, author, is_bot);
    }

    /// Enqueue a message for `channel`, (re)scheduling the channel's
    /// delivery timer.
    #[instrument(skip(self, message), fields(channel = %channel, author = %message.author))]
    pub fn enqueue(self: &Arc<Self>, channel: &str, message: BatchedMessage) {
        self.topology.record(channel, &message.author, message.is_bot);
        let topo = self.topology.detect(channel);

        let entry = self.channels.entry(channel.to_string()).or_default();
        let (generation, wait) = {
            let mut state = entry.lock().unwrap();
            let now = Instant::now();

            if state.pending.is_empty() {
                state.current_wait = if topo.participant_count >= 3 && topo.human_present {
                    self.config.human_initial_seconds
                } else {
                    self.config.initial_seconds
                };
            } else {
                let since_last = now.duration_since(state.last_message_at).as_secs_f64();
                if since_last <= self.config.rapid_threshold_seconds {
                    state.current_wait =
                        (state.current_wait + self.config.increment_seconds).min(self.config.max_seconds);
                }
            }

            state.pending.push(message);
            state.last_message_at = now;
            state.generation += 1;
            (state.generation, state.current_wait)
        };
        debug!(wait, generation, "scheduled debounce timer");

        let this = Arc::clone(self);
        let channel = channel.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            this.fire(&channel, generation);
        });
    }

    /// Drain and deliver `channel`'s pending batch if `generation` is
    /// still the most recent one scheduled; otherwise a newer message
    /// has already rescheduled delivery and this call is a no-op.
    fn fire(&self, channel: &str, generation: u64) {
        let Some(entry) = self.channels.get(channel) else { return };
        let drained = {
            let mut state = entry.lock().unwrap();
            if state.generation != generation {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        if drained.is_empty() {
            return;
        }
        (self.on_ready)(channel.to_string(), drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn msg(id: i64, author: &str) -> BatchedMessage {
        BatchedMessage { message_id: id, author: author.to_string(), is_bot: false, content: "hi".into() }
    }

    #[tokio::test]
    async fn single_message_fires_after_initial_wait() {
        let mut config = DebounceConfig::default();
        config.initial_seconds = 0.05;
        config.human_initial_seconds = 0.05;

        let delivered: Arc<StdMutex<Vec<Vec<BatchedMessage>>>> = Arc::new(StdMutex::new(Vec::new()));
        let delivered2 = delivered.clone();
        let batcher = Arc::new(Batcher::new(
            config,
            Arc::new(move |_channel, batch| delivered2.lock().unwrap().push(batch)),
        ));

        batcher.enqueue("chat:general", msg(1, "alice"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let got = delivered.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].len(), 1);
    }

    #[tokio::test]
    async fn rapid_messages_coalesce_into_one_batch() {
        let mut config = DebounceConfig::default();
        config.initial_seconds = 0.1;
        config.human_initial_seconds = 0.1;
        config.increment_seconds = 0.05;
        config.max_seconds = 0.3;
        config.rapid_threshold_seconds = 0.2;

        let fire_count = Arc::new(AtomicUsize::new(0));
        let delivered: Arc<StdMutex<Vec<Vec<BatchedMessage>>>> = Arc::new(StdMutex::new(Vec::new()));
        let fire_count2 = fire_count.clone();
        let delivered2 = delivered.clone();
        let batcher = Arc::new(Batcher::new(
            config,
            Arc::new(move |_channel, batch| {
                fire_count2.fetch_add(1, Ordering::SeqCst);
                delivered2.lock().unwrap().push(batch);
            }),
        ));

        batcher.enqueue("chat:general", msg(1, "alice"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        batcher.enqueue("chat:general", msg(2, "bob"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        batcher.enqueue("chat:general", msg(3, "alice"));

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(fire_count.load(Ordering::SeqCst), 1);
        let got = delivered.lock().unwrap();
        assert_eq!(got[0].len(), 3);
    }

    #[tokio::test]
    async fn separate_channels_batch_independently() {
        let mut config = DebounceConfig::default();
        config.initial_seconds = 0.05;
        config.human_initial_seconds = 0.05;

        let delivered: Arc<StdMutex<Vec<(String, usize)>>> = Arc::new(StdMutex::new(Vec::new()));
        let delivered2 = delivered.clone();
        let batcher = Arc::new(Batcher::new(
            config,
            Arc::new(move |channel, batch| delivered2.lock().unwrap().push((channel, batch.len()))),
        ));

        batcher.enqueue("chat:a", msg(1, "alice"));
        batcher.enqueue("chat:b", msg(2, "bob"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let got = delivered.lock().unwrap();
        assert_eq!(got.len(), 2);
    }
}
