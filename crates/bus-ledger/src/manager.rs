use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::types::{AppendOutcome, IdRange, Message, NewMessage, SearchHit, Summary};

/// Append-only durable message log plus full-text index (C1, §4.1).
///
/// A single `Mutex<Connection>` serialises writers in-process; SQLite's
/// `busy_timeout` (set in [`crate::db::init_db`]) covers the cross-process
/// case. Readers share the same connection under the same lock — simple
/// and correct for the single-host, multi-process target; a connection
/// pool would only help if readers needed to run concurrently with a
/// long-held writer transaction, which append() never does.
pub struct Ledger {
    db: Mutex<Connection>,
}

impl Ledger {
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Append a message. Atomic: row insert and FTS sync happen in one
    /// transaction, so a stale FTS entry can never outlive its row (§4.1).
    ///
    /// When `external_id` is set and already present, this is a no-op:
    /// the existing row's id is returned via [`AppendOutcome::DuplicateSkipped`]
    /// (P2 — idempotent in `external_id`).
    #[instrument(skip(self, msg), fields(channel = %msg.channel))]
    pub fn append(&self, msg: NewMessage) -> Result<AppendOutcome> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        if let Some(ext) = &msg.external_id {
            if let Some(existing_id) = tx
                .query_row(
                    "SELECT id FROM messages WHERE external_id = ?1",
                    params![ext],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
            {
                debug!(external_id = %ext, id = existing_id, "append: duplicate external_id, skipping");
                return Ok(AppendOutcome::DuplicateSkipped(existing_id));
            }
        }

        let now = bus_core::now_rfc3339();
        tx.execute(
            "INSERT INTO messages
             (external_id, channel, author_id, author_name, content, is_self, is_bot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                msg.external_id,
                msg.channel,
                msg.author_id,
                msg.author_name,
                msg.content,
                msg.is_self,
                msg.is_bot,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO messages_fts(rowid, content, author_name, channel)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, msg.content, msg.author_name, msg.channel],
        )?;

        tx.commit()?;
        Ok(AppendOutcome::Inserted(id))
    }

    /// Ordered (id-ascending) messages for a channel, optionally bounded
    /// by `before_id`/`since_ts` and always limit-bounded.
    ///
    /// `channel` is matched as a prefix (`channel LIKE 'chat:%'`-style),
    /// matching the distilled spec's "optionally filtered by channel
    /// prefix match".
    pub fn get_range(
        &self,
        channel_prefix: &str,
        before_id: Option<i64>,
        since_ts: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let like_pattern = format!("{channel_prefix}%");

        let mut stmt = db.prepare(
            "SELECT id, external_id, channel, author_id, author_name, content,
                    is_self, is_bot, created_at, summary_id, batch_id
             FROM messages
             WHERE channel LIKE ?1
               AND (?2 IS NULL OR id < ?2)
               AND (?3 IS NULL OR created_at >= ?3)
             ORDER BY id ASC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![like_pattern, before_id, since_ts, limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Full-text ranked search over `content, author_name, channel`.
    ///
    /// Query syntax is SQLite FTS5's native MATCH syntax: juxtaposition =
    /// AND, `OR`, `"phrase"`, `prefix*`, `NOT` — this is the public query
    /// language surfaced at `/tools/raw_search` (resolves the distilled
    /// spec's "document the chosen FTS syntax" open question).
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.external_id, m.channel, m.author_id, m.author_name, m.content,
                    m.is_self, m.is_bot, m.created_at, m.summary_id, m.batch_id, f.rank
             FROM messages_fts f
             JOIN messages m ON m.id = f.rowid
             WHERE messages_fts MATCH ?1
             ORDER BY f.rank
             LIMIT ?2",
        )?;
        let raw: Vec<(Message, f64)> = stmt
            .query_map(params![query, limit as i64], |row| {
                let msg = row_to_message(row)?;
                let rank: f64 = row.get(11)?;
                Ok((msg, rank))
            })?
            .filter_map(|r| r.ok())
            .collect();

        // bm25 rank from FTS5 is negative, more negative = more relevant;
        // normalise into (0, 1] preserving relative order, stable for
        // identical corpus+query since it's a pure function of `rank`.
        let hits = raw
            .into_iter()
            .map(|(message, rank)| SearchHit {
                message,
                relevance: 1.0 / (1.0 + rank.abs()),
            })
            .collect();
        Ok(hits)
    }

    pub fn count_unsummarized(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE summary_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn get_unsummarized(&self, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, external_id, channel, author_id, author_name, content,
                    is_self, is_bot, created_at, summary_id, batch_id
             FROM messages WHERE summary_id IS NULL ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Record a new summary and stamp `summary_id` on every message in
    /// `[range.start_id, range.end_id]` (P3).
    #[instrument(skip(self, text, channels))]
    pub fn mark_summarized(
        &self,
        range: IdRange,
        text: &str,
        channels: &[String],
        kind: &str,
    ) -> Result<Summary> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        // A summary's channel set is stored as JSON; overlap is checked
        // per-channel in application code below since SQLite has no JSON
        // array membership operator without a fixed array width.
        let mut overlap_stmt = tx.prepare(
            "SELECT channels FROM summaries
             WHERE NOT (end_message_id < ?1 OR start_message_id > ?2)",
        )?;
        let candidate_channel_sets: Vec<String> = overlap_stmt
            .query_map(params![range.start_id, range.end_id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(overlap_stmt);

        let overlap = candidate_channel_sets.iter().any(|json| {
            let existing: Vec<String> = serde_json::from_str(json).unwrap_or_default();
            existing.iter().any(|c| channels.contains(c))
        });
        let overlap: Option<i64> = if overlap { Some(0) } else { None };
        if overlap.is_some() {
            return Err(LedgerError::RangeOverlap {
                start: range.start_id,
                end: range.end_id,
            });
        }

        let now = bus_core::now_rfc3339();
        let channels_json = serde_json::to_string(channels).unwrap_or_else(|_| "[]".to_string());
        let message_count = range.len();

        let (span_start, span_end): (Option<String>, Option<String>) = tx.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM messages WHERE id BETWEEN ?1 AND ?2",
            params![range.start_id, range.end_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            "INSERT INTO summaries
             (text, start_message_id, end_message_id, message_count, channels,
              time_span_start, time_span_end, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                text,
                range.start_id,
                range.end_id,
                message_count,
                channels_json,
                span_start,
                span_end,
                kind,
                now,
            ],
        )?;
        let summary_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE messages SET summary_id = ?1 WHERE id BETWEEN ?2 AND ?3",
            params![summary_id, range.start_id, range.end_id],
        )?;
        tx.commit()?;

        Ok(Summary {
            id: summary_id,
            text: text.to_string(),
            start_message_id: range.start_id,
            end_message_id: range.end_id,
            message_count,
            channels: channels.to_vec(),
            time_span_start: span_start,
            time_span_end: span_end,
            kind: kind.to_string(),
            created_at: now,
        })
    }

    pub fn recent_summaries(&self, limit: usize) -> Result<Vec<Summary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, text, start_message_id, end_message_id, message_count,
                    channels, time_span_start, time_span_end, kind, created_at
             FROM summaries ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_summary)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn count_uningested(&self) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE batch_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn get_uningested(&self, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, external_id, channel, author_id, author_name, content,
                    is_self, is_bot, created_at, summary_id, batch_id
             FROM messages WHERE batch_id IS NULL ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn mark_ingested(&self, range: IdRange, batch_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE messages SET batch_id = ?1 WHERE id BETWEEN ?2 AND ?3",
            params![batch_id, range.start_id, range.end_id],
        )?;
        if n == 0 {
            warn!(start = range.start_id, end = range.end_id, "mark_ingested: no rows matched");
        }
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        external_id: row.get(1)?,
        channel: row.get(2)?,
        author_id: row.get(3)?,
        author_name: row.get(4)?,
        content: row.get(5)?,
        is_self: row.get(6)?,
        is_bot: row.get(7)?,
        created_at: row.get(8)?,
        summary_id: row.get(9)?,
        batch_id: row.get(10)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<Summary> {
    let channels_json: String = row.get(5)?;
    Ok(Summary {
        id: row.get(0)?,
        text: row.get(1)?,
        start_message_id: row.get(2)?,
        end_message_id: row.get(3)?,
        message_count: row.get(4)?,
        channels: serde_json::from_str(&channels_json).unwrap_or_default(),
        time_span_start: row.get(6)?,
        time_span_end: row.get(7)?,
        kind: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Ledger {
        Ledger::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn msg(channel: &str, content: &str, external_id: Option<&str>) -> NewMessage {
        NewMessage {
            external_id: external_id.map(String::from),
            channel: channel.to_string(),
            author_id: 1,
            author_name: "alice".to_string(),
            content: content.to_string(),
            is_self: false,
            is_bot: false,
        }
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let ledger = open();
        let a = ledger.append(msg("chat:general", "hello", None)).unwrap();
        let b = ledger.append(msg("chat:general", "world", None)).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn duplicate_external_id_is_idempotent() {
        let ledger = open();
        let first = ledger.append(msg("chat:general", "hi", Some("ext-1"))).unwrap();
        let second = ledger.append(msg("chat:general", "hi again", Some("ext-1"))).unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());

        let rows = ledger.get_range("chat:general", None, None, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn fts_search_finds_unique_token() {
        let ledger = open();
        let appended = ledger
            .append(msg("chat:general", "the quokka jumped over the fence", None))
            .unwrap();
        let hits = ledger.fts_search("quokka", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.id, appended.id());
    }

    #[test]
    fn mark_summarized_updates_count_and_pointers() {
        let ledger = open();
        for i in 0..5 {
            ledger
                .append(msg("chat:general", &format!("msg {i}"), None))
                .unwrap();
        }
        assert_eq!(ledger.count_unsummarized().unwrap(), 5);

        let range = IdRange { start_id: 1, end_id: 3 };
        let summary = ledger
            .mark_summarized(range, "first three", &["chat:general".to_string()], "rolling")
            .unwrap();

        assert_eq!(ledger.count_unsummarized().unwrap(), 2);
        let rows = ledger.get_range("chat:general", None, None, 10).unwrap();
        for row in rows.iter().filter(|m| m.id <= 3) {
            assert_eq!(row.summary_id, Some(summary.id));
        }
    }

    #[test]
    fn get_range_respects_channel_prefix_and_limit() {
        let ledger = open();
        ledger.append(msg("chat:general", "a", None)).unwrap();
        ledger.append(msg("chat:random", "b", None)).unwrap();
        ledger.append(msg("chat:general", "c", None)).unwrap();

        let rows = ledger.get_range("chat:general", None, None, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|m| m.channel == "chat:general"));
    }
}
