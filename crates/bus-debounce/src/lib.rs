//! `bus-debounce` — per-channel message batching with an escalating,
//! topology-aware wait (C5).

pub mod manager;
pub mod topology;
pub mod types;

pub use manager::{BatchReady, Batcher};
pub use topology::TopologyTracker;
pub use types::{BatchedMessage, Topology};
