use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("write lock unavailable after {ms}ms")]
    LockTimeout { ms: u64 },

    #[error("message not found: {id}")]
    NotFound { id: i64 },

    #[error("summary range [{start}, {end}] overlaps an existing summary for this channel")]
    RangeOverlap { start: i64, end: i64 },
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::LockTimeout { .. } => "LOCK_TIMEOUT",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::RangeOverlap { .. } => "RANGE_OVERLAP",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
