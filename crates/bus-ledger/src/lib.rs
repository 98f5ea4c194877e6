//! `bus-ledger` — append-only durable message log with full-text search
//! (C1). The source of truth for every conversational turn in the bus.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::{LedgerError, Result};
pub use manager::Ledger;
pub use types::{AppendOutcome, IdRange, Message, NewMessage, SearchHit, Summary};
