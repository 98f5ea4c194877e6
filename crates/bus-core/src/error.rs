use thiserror::Error;

/// Cross-cutting error kinds shared by every subsystem (§7).
///
/// Individual crates define their own `thiserror` enum for domain-specific
/// variants and map into these codes via a `kind()`/`code()` method, the
/// same way `skynet_core::error::SkynetError::code()` exposes a stable
/// string for WS `RES` error frames.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("duplicate: {0}")]
    ConflictDuplicate(String),

    #[error("prompt too long")]
    PromptTooLong,

    #[error("worker failure: {0}")]
    WorkerFailure(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("not a member: {0}")]
    NotMember(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BusError {
    /// Stable short code surfaced to HTTP/WS clients, mirroring
    /// `SkynetError::code()`.
    pub fn code(&self) -> &'static str {
        match self {
            BusError::TransientIo(_) => "TRANSIENT_IO",
            BusError::ConflictDuplicate(_) => "CONFLICT_DUPLICATE",
            BusError::PromptTooLong => "PROMPT_TOO_LONG",
            BusError::WorkerFailure(_) => "WORKER_FAILURE",
            BusError::AuthRejected(_) => "AUTH_REJECTED",
            BusError::NotMember(_) => "NOT_MEMBER",
            BusError::NotFound(_) => "NOT_FOUND",
            BusError::Fatal(_) => "FATAL",
            BusError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
