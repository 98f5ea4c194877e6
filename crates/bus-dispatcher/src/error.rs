use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("ledger error: {0}")]
    Ledger(#[from] bus_ledger::LedgerError),
    #[error("claim store error: {0}")]
    Claims(#[from] bus_claims::ClaimError),
    #[error("active-mode error: {0}")]
    ActiveMode(#[from] bus_active_mode::ActiveModeError),
    #[error("memory router error: {0}")]
    Memory(#[from] bus_memory::MemoryError),
    #[error("invoker error: {0}")]
    Invoker(#[from] bus_invoker::InvokerError),
    #[error("channel actor is no longer running")]
    ChannelClosed,
}

impl DispatcherError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatcherError::Ledger(_) => "ledger_error",
            DispatcherError::Claims(_) => "claims_error",
            DispatcherError::ActiveMode(_) => "active_mode_error",
            DispatcherError::Memory(_) => "memory_error",
            DispatcherError::Invoker(_) => "invoker_error",
            DispatcherError::ChannelClosed => "channel_closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
