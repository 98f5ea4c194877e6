use rusqlite::{Connection, Result};

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS claims (
            channel_id  TEXT NOT NULL,
            message_id  INTEGER NOT NULL,
            instance_id TEXT NOT NULL,
            claimed_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            PRIMARY KEY (channel_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_claims_expires ON claims(expires_at);",
    )
}
