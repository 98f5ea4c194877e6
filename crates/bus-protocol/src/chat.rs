use serde::{Deserialize, Serialize};

/// Client → Server chat frames (§4.8). Tagged by `type`; the handshake
/// itself is out-of-band (see `bus-chat::auth`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        room_id: String,
        content: String,
    },
    History {
        room_id: String,
        #[serde(default)]
        before_id: Option<i64>,
        #[serde(default = "default_history_limit")]
        limit: u32,
    },
    Typing {
        room_id: String,
    },
}

fn default_history_limit() -> u32 {
    50
}

/// Maximum `history` page size (§4.8).
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Server → Client chat frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        user: UserSummary,
        rooms: Vec<RoomSummary>,
        users: Vec<UserSummary>,
    },
    Message {
        room_id: String,
        message: ChatMessageView,
    },
    History {
        room_id: String,
        messages: Vec<ChatMessageView>,
        has_more: bool,
    },
    Typing {
        room_id: String,
        username: String,
    },
    Presence {
        user_id: String,
        username: String,
        online: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub slug: String,
    pub display_name: String,
    pub is_dm: bool,
}

/// `POST /rooms` request body (§4.8 HTTP façade).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub is_dm: bool,
    pub user_id: String,
    pub username: String,
    pub display_name_for_user: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// `POST /rooms/{id}/join` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomRequest {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// `POST /rooms/{id}/messages` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct PostMessageRequest {
    pub user_id: String,
    pub username: String,
    pub content: String,
}

/// `GET /rooms/{id}/messages` query string.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub before_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<ChatMessageView>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageView {
    pub id: i64,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: String,
}
