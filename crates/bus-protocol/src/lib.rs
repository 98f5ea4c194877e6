//! `bus-protocol` — wire types shared between the gateway's HTTP/WS
//! surface and the stdio bridge adapter. No business logic lives here,
//! mirroring `skynet-protocol`'s scope in the teacher workspace.

pub mod chat;
pub mod memory_api;
