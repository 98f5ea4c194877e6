use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use bus_chat::ChatFabric;
use bus_dispatcher::{OutboundSink, Result};

/// Delivers dispatcher replies into the room chat fabric — the one real
/// implementation of [`OutboundSink`] this binary wires up. `channel`
/// strings produced for chat traffic are always `"chat:{room_id}"`
/// (§4.7's `channel_family` split on `:`), so delivery just strips the
/// prefix back off.
pub struct ChatOutboundSink {
    chat: Arc<ChatFabric>,
    bot_id: String,
    bot_name: String,
}

impl ChatOutboundSink {
    pub fn new(chat: Arc<ChatFabric>, bot_id: impl Into<String>, bot_name: impl Into<String>) -> Self {
        Self { chat, bot_id: bot_id.into(), bot_name: bot_name.into() }
    }
}

#[async_trait]
impl OutboundSink for ChatOutboundSink {
    async fn send_reply(&self, channel: &str, chunks: &[String]) -> Result<()> {
        let Some(room_id) = channel.strip_prefix("chat:") else {
            warn!(channel, "outbound sink only delivers chat: channels, dropping reply");
            return Ok(());
        };

        if let Err(e) = self.chat.join_room(room_id, &self.bot_id) {
            warn!(error = %e, room_id, "failed to ensure bot room membership before reply");
            return Ok(());
        }

        for chunk in chunks {
            if let Err(e) = self.chat.post_message(room_id, &self.bot_id, &self.bot_name, chunk) {
                warn!(error = %e, room_id, "failed to post reply chunk");
            }
        }
        Ok(())
    }
}
