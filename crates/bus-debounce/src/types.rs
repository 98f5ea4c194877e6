/// A single message queued into a channel's pending batch.
#[derive(Debug, Clone)]
pub struct BatchedMessage {
    pub message_id: i64,
    pub author: String,
    pub is_bot: bool,
    pub content: String,
}

/// Snapshot of who has recently spoken in a channel, used to decide the
/// initial debounce wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Topology {
    pub participant_count: usize,
    pub human_present: bool,
}
