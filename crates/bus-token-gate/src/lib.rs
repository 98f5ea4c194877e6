//! `bus-token-gate` — per-entity auth gate (C9): validates the opaque
//! `token` field every memory-layer call carries.

pub mod error;
pub mod gate;

pub use error::{Result, TokenGateError};
pub use gate::{TokenGate, EXEMPT_OPERATIONS};
