use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenGateError {
    #[error("auth rejected: {0}")]
    AuthRejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("regenerate_token requires the master token")]
    MasterRequired,
}

impl TokenGateError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenGateError::AuthRejected(_) => "auth_rejected",
            TokenGateError::Io(_) => "io",
            TokenGateError::MasterRequired => "master_required",
        }
    }
}

pub type Result<T> = std::result::Result<T, TokenGateError>;
