use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActiveModeError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ActiveModeError>;
