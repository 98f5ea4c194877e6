use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bus_protocol::chat::{ChatMessageView, RoomSummary, ServerFrame, UserSummary};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::types::{ChatMessage, Room, User};

const ROOM_BROADCAST_CAPACITY: usize = 256;
const PRESENCE_BROADCAST_CAPACITY: usize = 256;

/// Fans server frames out to every open WS connection belonging to a
/// room's members, grounded on `skynet-gateway/src/ws/broadcast.rs`'s
/// `EventBroadcaster`, scoped per-room instead of global.
pub struct ChatFabric {
    db: Mutex<Connection>,
    rooms: DashMap<String, broadcast::Sender<ServerFrame>>,
    presence: DashMap<String, AtomicUsize>,
    presence_bus: broadcast::Sender<ServerFrame>,
}

impl ChatFabric {
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        let (presence_bus, _) = broadcast::channel(PRESENCE_BROADCAST_CAPACITY);
        Ok(Self { db: Mutex::new(conn), rooms: DashMap::new(), presence: DashMap::new(), presence_bus })
    }

    /// Subscribe to process-wide `online`/`offline` presence transitions
    /// (§4.8) — distinct from the per-room broadcast, since presence is
    /// not scoped to a single room.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<ServerFrame> {
        self.presence_bus.subscribe()
    }

    pub fn broadcast_presence(&self, user_id: &str, username: &str, online: bool) {
        let _ = self.presence_bus.send(ServerFrame::Presence {
            user_id: user_id.to_string(),
            username: username.to_string(),
            online,
        });
    }

    fn room_sender(&self, room_id: &str) -> broadcast::Sender<ServerFrame> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_BROADCAST_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<ServerFrame> {
        self.room_sender(room_id).subscribe()
    }

    fn broadcast_to_room(&self, room_id: &str, frame: ServerFrame) {
        let _ = self.room_sender(room_id).send(frame);
    }

    pub fn ensure_user(&self, id: &str, username: &str, display_name: &str, is_bot: bool) -> Result<User> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_users (id, username, display_name, is_bot)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![id, username, display_name, is_bot],
        )?;
        Ok(User { id: id.to_string(), username: username.to_string(), display_name: display_name.to_string(), is_bot })
    }

    /// Creates the room and auto-joins `created_by` (§3's invariant:
    /// "creator auto-joined").
    pub fn create_room(&self, slug: &str, display_name: &str, is_dm: bool, created_by: &str) -> Result<Room> {
        let id = Uuid::now_v7().to_string();
        let now = bus_core::now_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO chat_rooms (id, slug, display_name, is_dm, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, slug, display_name, is_dm, created_by, now],
            )?;
            db.execute(
                "INSERT OR IGNORE INTO chat_memberships (room_id, user_id) VALUES (?1, ?2)",
                params![id, created_by],
            )?;
        }
        Ok(Room {
            id,
            slug: slug.to_string(),
            display_name: display_name.to_string(),
            is_dm,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    pub fn join_room(&self, room_id: &str, user_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let exists: Option<i64> = db
            .query_row("SELECT 1 FROM chat_rooms WHERE id = ?1", params![room_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }
        db.execute(
            "INSERT OR IGNORE INTO chat_memberships (room_id, user_id) VALUES (?1, ?2)",
            params![room_id, user_id],
        )?;
        Ok(())
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let found: Option<i64> = db
            .query_row(
                "SELECT 1 FROM chat_memberships WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id, slug, display_name, is_dm FROM chat_rooms")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RoomSummary {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    display_name: row.get(2)?,
                    is_dm: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id, username, display_name, is_bot FROM chat_users")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserSummary {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    display_name: row.get(2)?,
                    is_bot: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Persist a message and broadcast it to every room member's open
    /// connections. Validates membership first (P.NotMember).
    #[instrument(skip(self, content))]
    pub fn post_message(&self, room_id: &str, user_id: &str, username: &str, content: &str) -> Result<ChatMessage> {
        if !self.is_member(room_id, user_id)? {
            return Err(ChatError::NotMember(room_id.to_string()));
        }
        let db = self.db.lock().unwrap();
        let now = bus_core::now_rfc3339();
        db.execute(
            "INSERT INTO chat_messages (room_id, user_id, username, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![room_id, user_id, username, content, now],
        )?;
        let id = db.last_insert_rowid();
        drop(db);

        let message = ChatMessage {
            id,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            username: username.to_string(),
            content: content.to_string(),
            created_at: now,
        };
        self.broadcast_to_room(
            room_id,
            ServerFrame::Message { room_id: room_id.to_string(), message: to_view(&message) },
        );
        Ok(message)
    }

    pub fn broadcast_typing(&self, room_id: &str, username: &str) {
        self.broadcast_to_room(
            room_id,
            ServerFrame::Typing { room_id: room_id.to_string(), username: username.to_string() },
        );
    }

    /// Up to `limit` messages, newest-first then reversed to ascending,
    /// plus a `has_more` flag (§4.8).
    pub fn history(&self, room_id: &str, before_id: Option<i64>, limit: u32) -> Result<(Vec<ChatMessage>, bool)> {
        let db = self.db.lock().unwrap();
        let fetch = limit as i64 + 1;
        let mut stmt = db.prepare(
            "SELECT id, room_id, user_id, username, content, created_at
             FROM chat_messages
             WHERE room_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let mut rows: Vec<ChatMessage> = stmt
            .query_map(params![room_id, before_id, fetch], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    room_id: row.get(1)?,
                    user_id: row.get(2)?,
                    username: row.get(3)?,
                    content: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let has_more = rows.len() as i64 > limit as i64;
        rows.truncate(limit as usize);
        rows.reverse();
        Ok((rows, has_more))
    }

    /// Increment a user's open-connection count. Returns `true` if this
    /// was the 0→1 transition (the user just came online).
    pub fn connect_presence(&self, user_id: &str) -> bool {
        let entry = self.presence.entry(user_id.to_string()).or_insert_with(|| AtomicUsize::new(0));
        entry.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Decrement a user's open-connection count. Returns `true` if this
    /// was the 1→0 transition (the user just went offline).
    pub fn disconnect_presence(&self, user_id: &str) -> bool {
        if let Some(entry) = self.presence.get(user_id) {
            return entry.fetch_sub(1, Ordering::SeqCst) == 1;
        }
        false
    }
}

pub fn to_view(message: &ChatMessage) -> ChatMessageView {
    ChatMessageView {
        id: message.id,
        room_id: message.room_id.clone(),
        user_id: message.user_id.clone(),
        username: message.username.clone(),
        content: message.content.clone(),
        created_at: message.created_at.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> ChatFabric {
        ChatFabric::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn post_message_rejects_non_members() {
        let fabric = open();
        fabric.ensure_user("u1", "alice", "Alice", false).unwrap();
        fabric.ensure_user("u2", "bob", "Bob", false).unwrap();
        let room = fabric.create_room("general", "General", false, "u2").unwrap();
        let err = fabric.post_message(&room.id, "u1", "alice", "hi").unwrap_err();
        assert!(matches!(err, ChatError::NotMember(_)));
    }

    #[test]
    fn create_room_auto_joins_creator() {
        let fabric = open();
        fabric.ensure_user("u1", "alice", "Alice", false).unwrap();
        let room = fabric.create_room("general", "General", false, "u1").unwrap();
        assert!(fabric.is_member(&room.id, "u1").unwrap());
    }

    #[test]
    fn post_message_succeeds_after_join() {
        let fabric = open();
        fabric.ensure_user("u1", "alice", "Alice", false).unwrap();
        let room = fabric.create_room("general", "General", false, "u1").unwrap();
        fabric.join_room(&room.id, "u1").unwrap();
        let msg = fabric.post_message(&room.id, "u1", "alice", "hi").unwrap();
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn history_reports_has_more() {
        let fabric = open();
        fabric.ensure_user("u1", "alice", "Alice", false).unwrap();
        let room = fabric.create_room("general", "General", false, "u1").unwrap();
        fabric.join_room(&room.id, "u1").unwrap();
        for i in 0..5 {
            fabric.post_message(&room.id, "u1", "alice", &format!("msg {i}")).unwrap();
        }
        let (messages, has_more) = fabric.history(&room.id, None, 3).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(has_more);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn presence_transitions_on_first_and_last_connection() {
        let fabric = open();
        assert!(fabric.connect_presence("u1"));
        assert!(!fabric.connect_presence("u1"));
        assert!(!fabric.disconnect_presence("u1"));
        assert!(fabric.disconnect_presence("u1"));
    }
}
