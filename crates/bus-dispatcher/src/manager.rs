use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use bus_active_mode::ActiveModeRegistry;
use bus_claims::ClaimStore;
use bus_core::config::{DebounceConfig, CHUNK_LIMIT_CHARS, CHUNK_SPLIT_CHARS};
use bus_core::{ChannelId, InstanceId};
use bus_debounce::{BatchReady, BatchedMessage, Batcher};
use bus_invoker::{InvokeOptions, InvokeOutcome, Invoker, InvokerError, SessionKey};
use bus_ledger::{Ledger, NewMessage};
use bus_memory::MemoryRouter;

use crate::error::Result;
use crate::mention::is_mention;
use crate::outbound::{chunk_reply, OutboundSink};
use crate::prompt::{build_prompt, strip_framing};
use crate::types::{ChannelEvent, DispatchState, IncomingMessage};

const AMBIENT_RECALL_LIMIT_PER_LAYER: usize = 5;
const PROMPT_REDUCTION_RETRIES: u32 = 2;

fn channel_family(channel: &str) -> &str {
    channel.split(':').next().unwrap_or("default")
}

/// Owns and coordinates C1/C3/C4/C5/C6/C2 for every channel, one
/// serialised actor task per channel (§4.7). The batcher's `BatchReady`
/// callback forwards into the same channel's actor rather than holding a
/// circular `Arc<Dispatcher>` back-reference (§9).
pub struct Dispatcher {
    ledger: Arc<Ledger>,
    claims: Arc<ClaimStore>,
    active_mode: Arc<ActiveModeRegistry>,
    batcher: Arc<Batcher>,
    invoker: Arc<Invoker>,
    memory: Arc<MemoryRouter>,
    outbound: Arc<dyn OutboundSink>,
    instance: InstanceId,
    self_name: String,
    channels: Arc<DashMap<String, mpsc::UnboundedSender<ChannelEvent>>>,
    chunk_limit: usize,
    chunk_split: usize,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        claims: Arc<ClaimStore>,
        active_mode: Arc<ActiveModeRegistry>,
        debounce_config: DebounceConfig,
        invoker: Arc<Invoker>,
        memory: Arc<MemoryRouter>,
        outbound: Arc<dyn OutboundSink>,
        instance: InstanceId,
        self_name: impl Into<String>,
    ) -> Arc<Self> {
        let channels: Arc<DashMap<String, mpsc::UnboundedSender<ChannelEvent>>> = Arc::new(DashMap::new());
        let forward = channels.clone();
        let on_ready: BatchReady = Arc::new(move |channel, batch| {
            if let Some(tx) = forward.get(&channel) {
                let _ = tx.send(ChannelEvent::BatchReady(batch));
            }
        });
        let batcher = Arc::new(Batcher::new(debounce_config, on_ready));

        Arc::new(Self {
            ledger,
            claims,
            active_mode,
            batcher,
            invoker,
            memory,
            outbound,
            instance,
            self_name: self_name.into(),
            channels,
            chunk_limit: CHUNK_LIMIT_CHARS,
            chunk_split: CHUNK_SPLIT_CHARS,
        })
    }

    /// Hand an inbound message to its channel's actor, spawning one if
    /// this is the channel's first message.
    pub fn handle_inbound(self: &Arc<Self>, msg: IncomingMessage) -> Result<()> {
        let tx = self.channel_sender(msg.channel.as_str());
        let _ = tx.send(ChannelEvent::Inbound(msg));
        Ok(())
    }

    fn channel_sender(self: &Arc<Self>, channel: &str) -> mpsc::UnboundedSender<ChannelEvent> {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let (tx, rx) = mpsc::unbounded_channel();
                e.insert(tx.clone());
                let dispatcher = Arc::clone(self);
                let channel = channel.to_string();
                tokio::spawn(async move { dispatcher.run_channel_actor(channel, rx).await });
                tx
            }
        }
    }

    /// One actor per channel; events are processed strictly in order, so
    /// at most one batch is ever being drained for a given channel (§5).
    async fn run_channel_actor(self: Arc<Self>, channel: String, mut rx: mpsc::UnboundedReceiver<ChannelEvent>) {
        let mut state = DispatchState::Idle;
        let mut pending_is_mention = false;

        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Inbound(msg) => {
                    match self.on_inbound(&channel, msg).await {
                        Ok(mentioned) if mentioned => {
                            pending_is_mention = true;
                            state = DispatchState::Batching;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(channel = %channel, error = %e, "failed to process inbound message"),
                    }
                }
                ChannelEvent::BatchReady(batch) => {
                    state = DispatchState::Claiming;
                    let mention = pending_is_mention;
                    pending_is_mention = false;
                    state = self.on_batch_ready(&channel, batch, mention).await;
                }
            }
        }
        info!(channel = %channel, final_state = ?state, "channel actor exiting");
    }

    /// Idle transitions (§4.7): append, best-effort L3 fan-out, topology
    /// update, then decide whether this message starts/continues a
    /// batch. Returns whether the message was a mention.
    #[instrument(skip(self, msg), fields(channel = %channel))]
    async fn on_inbound(&self, channel: &str, msg: IncomingMessage) -> Result<bool> {
        let outcome = self.ledger.append(NewMessage {
            external_id: msg.external_id.clone(),
            channel: channel.to_string(),
            author_id: msg.author_id,
            author_name: msg.author_name.clone(),
            content: msg.content.clone(),
            is_self: false,
            is_bot: msg.is_bot,
        })?;

        let memory = self.memory.clone();
        let content = msg.content.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.graph().store(&content, json!({})).await {
                warn!(error = %e, "best-effort graph fan-out failed");
            }
        });

        self.batcher.record_presence(channel, &msg.author_name, msg.is_bot);

        let mentioned = is_mention(&msg.content, &self.self_name, &ChannelId::new(channel));
        let active = self.active_mode.is_active(channel)?;
        if mentioned || active {
            self.batcher.enqueue(
                channel,
                BatchedMessage {
                    message_id: outcome.id(),
                    author: msg.author_name,
                    is_bot: msg.is_bot,
                    content: msg.content,
                },
            );
        }
        Ok(mentioned)
    }

    /// Claiming → Invoking → Delivering/Cooldown (§4.7). Claim release
    /// and active-mode bookkeeping happen on every terminal outcome,
    /// success or failure, per §9's resolution of the claim-release
    /// Open Question.
    #[instrument(skip(self, batch), fields(channel = %channel, mention, batch_len = batch.len()))]
    async fn on_batch_ready(&self, channel: &str, batch: Vec<BatchedMessage>, mention: bool) -> DispatchState {
        let Some(last) = batch.last() else { return DispatchState::Idle };
        let claimed = match self.claims.try_claim(channel, last.message_id, self.instance.as_str()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "claim attempt failed");
                return DispatchState::Idle;
            }
        };
        if !claimed {
            return DispatchState::Idle;
        }

        let outcome = self.invoke_for_batch(channel, &batch).await;

        let _ = self.claims.release(channel, last.message_id, self.instance.as_str());

        match outcome {
            Ok(InvokeOutcome::Ok(text)) => {
                self.deliver_reply(channel, &text).await;
                if mention {
                    let _ = self.active_mode.enter(channel, self.instance.as_str());
                }
                let _ = self.active_mode.touch(channel);
                DispatchState::Cooldown
            }
            Ok(InvokeOutcome::PassiveSkip) => {
                let _ = self.active_mode.touch(channel);
                DispatchState::Cooldown
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "worker invocation failed, no reply sent");
                DispatchState::Cooldown
            }
        }
    }

    async fn invoke_for_batch(
        &self,
        channel: &str,
        batch: &[BatchedMessage],
    ) -> std::result::Result<InvokeOutcome, InvokerError> {
        let context = batch.last().map(|m| m.content.as_str()).unwrap_or(channel);
        let bundle = self
            .memory
            .ambient_recall(context, AMBIENT_RECALL_LIMIT_PER_LAYER)
            .await
            .map_err(|e| InvokerError::WorkerFailure(e.to_string()))?;
        let prompt = build_prompt(&bundle, batch);

        let session_key = SessionKey::new(self.self_name.clone(), channel_family(channel));
        self.invoker
            .invoke_with_retry(&prompt, &session_key, &InvokeOptions::default(), PROMPT_REDUCTION_RETRIES, |p, retry| {
                let keep = (p.len() as f64 * 0.7f64.powi(retry as i32)) as usize;
                p.chars().take(keep.max(1)).collect()
            })
            .await
    }

    async fn deliver_reply(&self, channel: &str, text: &str) {
        let cleaned = strip_framing(text);
        let outcome = self.ledger.append(NewMessage {
            external_id: None,
            channel: channel.to_string(),
            author_id: 0,
            author_name: self.self_name.clone(),
            content: cleaned.clone(),
            is_self: true,
            is_bot: true,
        });
        if let Err(e) = outcome {
            warn!(channel = %channel, error = %e, "failed to append self-reply to ledger");
            return;
        }

        let chunks = chunk_reply(&cleaned, self.chunk_limit, self.chunk_split);
        if let Err(e) = self.outbound.send_reply(channel, &chunks).await {
            warn!(channel = %channel, error = %e, "failed to broadcast reply");
        }

        let memory = self.memory.clone();
        let content = cleaned;
        tokio::spawn(async move {
            if let Err(e) = memory.graph().store(&content, json!({"is_self": true})).await {
                warn!(error = %e, "best-effort graph fan-out for reply failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bus_active_mode::ActiveModeRegistry;
    use bus_claims::ClaimStore;
    use bus_core::config::DebounceConfig;
    use bus_invoker::{Invoker, RawOutput, SessionBounds, WorkerBackend};
    use bus_ledger::Ledger;
    use bus_memory::{AnchorsLayer, CrystalsLayer, GraphBackend, GraphLayer, HealthStatus, LayerResult, MemoryRouter};
    use rusqlite::Connection;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct EchoBackend;

    #[async_trait]
    impl WorkerBackend for EchoBackend {
        async fn run(
            &self,
            prompt: &str,
            _model: &str,
            _resume: Option<&str>,
            _timeout: Duration,
        ) -> bus_invoker::Result<RawOutput> {
            Ok(RawOutput { stdout: format!("echo: {}", prompt.lines().last().unwrap_or("")), stderr: String::new(), success: true })
        }
    }

    struct NullGraphBackend;

    #[async_trait]
    impl GraphBackend for NullGraphBackend {
        async fn ingest_episode(&self, _content: &str) -> bus_memory::Result<()> {
            Ok(())
        }
        async fn search(&self, _query: &str, _limit: usize) -> bus_memory::Result<Vec<LayerResult>> {
            Ok(Vec::new())
        }
        async fn find_entity(&self, _name: &str, _group: &str) -> bus_memory::Result<Option<bus_memory::types::GraphEntity>> {
            unreachable!("not exercised by dispatcher tests")
        }
        async fn create_entity(
            &self,
            _name: &str,
            _group: &str,
            _entity_type: Option<&str>,
        ) -> bus_memory::Result<bus_memory::types::GraphEntity> {
            unreachable!("not exercised by dispatcher tests")
        }
        async fn find_edge(
            &self,
            _source_uuid: &str,
            _relation: &str,
            _target_uuid: &str,
        ) -> bus_memory::Result<Option<bus_memory::types::GraphEdge>> {
            unreachable!("not exercised by dispatcher tests")
        }
        async fn create_edge(
            &self,
            _source_uuid: &str,
            _relation: &str,
            _target_uuid: &str,
            _fact: Option<&str>,
        ) -> bus_memory::Result<bus_memory::types::GraphEdge> {
            unreachable!("not exercised by dispatcher tests")
        }
        async fn explore(&self, _entity: &str, _depth: u32) -> bus_memory::Result<Vec<LayerResult>> {
            Ok(Vec::new())
        }
        async fn timeline(
            &self,
            _since: Option<chrono::DateTime<chrono::Utc>>,
            _until: Option<chrono::DateTime<chrono::Utc>>,
            _limit: usize,
        ) -> bus_memory::Result<Vec<bus_memory::types::GraphEdge>> {
            Ok(Vec::new())
        }
        async fn delete_edge(&self, _uuid: &str) -> bus_memory::Result<()> {
            Ok(())
        }
        async fn health(&self) -> bus_memory::Result<HealthStatus> {
            Ok(HealthStatus::ok("null backend"))
        }
    }

    struct RecordingSink {
        sent: StdMutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send_reply(&self, channel: &str, chunks: &[String]) -> Result<()> {
            self.sent.lock().unwrap().push((channel.to_string(), chunks.to_vec()));
            Ok(())
        }
    }

    async fn build_dispatcher(dir: &TempDir, sink: Arc<RecordingSink>) -> Arc<Dispatcher> {
        let ledger = Arc::new(Ledger::new(Connection::open_in_memory().unwrap()).unwrap());
        let claims = Arc::new(ClaimStore::with_default_ttl(Connection::open_in_memory().unwrap()).unwrap());
        let active_mode = Arc::new(ActiveModeRegistry::new(Connection::open_in_memory().unwrap()).unwrap());

        let anchors =
            AnchorsLayer::new(dir.path().join("anchors"), Arc::new(bus_memory::HttpVectorBackend::new("http://127.0.0.1:1")));
        let graph = GraphLayer::connect(Arc::new(NullGraphBackend)).await.unwrap();
        let crystals = CrystalsLayer::new(dir.path().join("crystals"), 10).unwrap();
        let memory = Arc::new(MemoryRouter::new(ledger.clone(), anchors, graph, crystals));

        let backend = Arc::new(EchoBackend);
        let invoker = Arc::new(Invoker::new(backend, "sonnet", SessionBounds::default()));

        let mut debounce_config = DebounceConfig::default();
        debounce_config.initial_seconds = 0.02;
        debounce_config.human_initial_seconds = 0.02;

        Dispatcher::new(
            ledger,
            claims,
            active_mode,
            debounce_config,
            invoker,
            memory,
            sink,
            InstanceId::from("instance-a"),
            "lyra",
        )
    }

    #[tokio::test]
    async fn mention_triggers_a_claimed_reply_that_is_broadcast() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink { sent: StdMutex::new(Vec::new()) });
        let dispatcher = build_dispatcher(&dir, sink.clone()).await;

        dispatcher
            .handle_inbound(IncomingMessage {
                external_id: None,
                channel: ChannelId::new("chat:general"),
                author_id: 1,
                author_name: "alice".into(),
                content: "hey lyra, you around?".into(),
                is_bot: false,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat:general");
        assert!(sent[0].1[0].contains("echo:"));
    }

    #[tokio::test]
    async fn non_mention_in_inactive_channel_never_invokes() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink { sent: StdMutex::new(Vec::new()) });
        let dispatcher = build_dispatcher(&dir, sink.clone()).await;

        dispatcher
            .handle_inbound(IncomingMessage {
                external_id: None,
                channel: ChannelId::new("chat:general"),
                author_id: 1,
                author_name: "alice".into(),
                content: "just chatting about nothing".into(),
                is_bot: false,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
