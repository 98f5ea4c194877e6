//! `bus-dispatcher` — per-channel response coordination state machine
//! (C7): mention detection, claim-gated invocation, chunked delivery.

pub mod error;
pub mod manager;
pub mod mention;
pub mod outbound;
pub mod prompt;
pub mod types;

pub use error::{DispatcherError, Result};
pub use manager::Dispatcher;
pub use mention::is_mention;
pub use outbound::{chunk_reply, OutboundSink};
pub use prompt::{build_prompt, strip_framing};
pub use types::{ChannelEvent, DispatchState, IncomingMessage};
