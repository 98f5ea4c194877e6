use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("ledger error: {0}")]
    Ledger(#[from] bus_ledger::LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Ledger(_) => "ledger_error",
            MemoryError::Io(_) => "io_error",
            MemoryError::Backend(_) => "backend_error",
            MemoryError::BackendUnavailable(_) => "backend_unavailable",
            MemoryError::NotFound(_) => "not_found",
            MemoryError::Serde(_) => "serde_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
