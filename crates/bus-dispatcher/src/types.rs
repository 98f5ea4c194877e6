use bus_core::ChannelId;
use bus_debounce::BatchedMessage;

/// A single inbound message handed to the dispatcher by whichever
/// transport received it (chat fabric, terminal adapter, …).
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub external_id: Option<String>,
    pub channel: ChannelId,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub is_bot: bool,
}

/// Per-channel state machine states (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Batching,
    Claiming,
    Invoking,
    Delivering,
    Cooldown,
}

/// Events a channel's actor task consumes, one at a time, strictly
/// serialised per channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Inbound(IncomingMessage),
    BatchReady(Vec<BatchedMessage>),
}
