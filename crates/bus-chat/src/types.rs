#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub slug: String,
    pub display_name: String,
    pub is_dm: bool,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: String,
}
