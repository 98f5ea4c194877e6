use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("prompt too long")]
    PromptTooLong,
    #[error("worker invocation failed: {0}")]
    WorkerFailure(String),
    #[error("worker timed out after {0}s")]
    Timeout(u64),
    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

impl InvokerError {
    pub fn code(&self) -> &'static str {
        match self {
            InvokerError::PromptTooLong => "prompt_too_long",
            InvokerError::WorkerFailure(_) => "worker_failure",
            InvokerError::Timeout(_) => "timeout",
            InvokerError::InvalidKey(_) => "invalid_key",
        }
    }
}

pub type Result<T> = std::result::Result<T, InvokerError>;
