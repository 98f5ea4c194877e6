use rusqlite::{Connection, Result};

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS active_modes (
            channel_id     TEXT PRIMARY KEY,
            entered_at     TEXT NOT NULL,
            last_activity  TEXT NOT NULL,
            instance_id    TEXT NOT NULL
        );",
    )
}
