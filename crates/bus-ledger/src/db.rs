use rusqlite::{Connection, Result};

/// Initialise ledger tables. Safe to call on every startup (idempotent).
///
/// Enables WAL journalling and a 5s busy timeout so concurrent readers
/// never block on the single writer longer than the advisory wait (§4.1,
/// §6) — mirrors `original_source/daemon/conversation.py::_connect_with_wal`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=5000;",
    )?;
    create_messages_table(conn)?;
    create_fts_index(conn)?;
    create_summaries_table(conn)?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            channel     TEXT NOT NULL,
            author_id   INTEGER NOT NULL,
            author_name TEXT NOT NULL,
            content     TEXT NOT NULL,
            is_self     INTEGER NOT NULL DEFAULT 0,
            is_bot      INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            summary_id  INTEGER,
            batch_id    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_channel_time
            ON messages(channel, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_author
            ON messages(author_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_external
            ON messages(external_id);
        CREATE INDEX IF NOT EXISTS idx_messages_unsummarized
            ON messages(channel, id) WHERE summary_id IS NULL;
        CREATE INDEX IF NOT EXISTS idx_messages_uningested
            ON messages(channel, id) WHERE batch_id IS NULL;",
    )
}

/// FTS5 virtual table, kept in sync transactionally with `messages`
/// (external-content, `content=''` — we maintain the index ourselves on
/// every insert so a stale FTS row can never outlive its message row).
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(content, author_name, channel, content='', content_rowid='id');",
    )
}

fn create_summaries_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS summaries (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            text            TEXT NOT NULL,
            start_message_id INTEGER NOT NULL,
            end_message_id   INTEGER NOT NULL,
            message_count   INTEGER NOT NULL,
            channels        TEXT NOT NULL,
            time_span_start TEXT,
            time_span_end   TEXT,
            kind            TEXT NOT NULL DEFAULT 'rolling',
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_created
            ON summaries(created_at DESC);",
    )
}
