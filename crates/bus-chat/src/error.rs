use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("not a member of room {0}")]
    NotMember(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Database(_) => "database_error",
            ChatError::RoomNotFound(_) => "room_not_found",
            ChatError::UserNotFound(_) => "user_not_found",
            ChatError::NotMember(_) => "not_member",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
