//! `bus-invoker` — long-lived LLM worker sessions with context-budget
//! tracking and restart (C6).

pub mod backend;
pub mod error;
pub mod manager;
pub mod types;

pub use backend::{RawOutput, SubprocessWorkerBackend, WorkerBackend};
pub use error::{InvokerError, Result};
pub use manager::{Invoker, SessionBounds};
pub use types::{InvokeOptions, InvokeOutcome, SessionKey};
