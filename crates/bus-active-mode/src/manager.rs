use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::Result;
use crate::types::ActiveMode;

/// Default active-mode reaper timeout (§3, §6): 10 minutes.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 10;

/// Per-channel engagement state, persisted so restarts recover the
/// active set (C4, §4.4).
pub struct ActiveModeRegistry {
    db: Mutex<Connection>,
}

impl ActiveModeRegistry {
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Enter active mode for a channel, or no-op if already active.
    #[instrument(skip(self))]
    pub fn enter(&self, channel: &str, instance: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = bus_core::now_rfc3339();
        db.execute(
            "INSERT INTO active_modes (channel_id, entered_at, last_activity, instance_id)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT(channel_id) DO NOTHING",
            params![channel, now, instance],
        )?;
        Ok(())
    }

    /// Update `last_activity` for a channel already in active mode.
    /// No-op if the channel is not currently active.
    pub fn touch(&self, channel: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = bus_core::now_rfc3339();
        db.execute(
            "UPDATE active_modes SET last_activity = ?1 WHERE channel_id = ?2",
            params![now, channel],
        )?;
        Ok(())
    }

    pub fn exit(&self, channel: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM active_modes WHERE channel_id = ?1", params![channel])?;
        Ok(())
    }

    pub fn is_active(&self, channel: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let found: Option<i64> = db
            .query_row(
                "SELECT 1 FROM active_modes WHERE channel_id = ?1",
                params![channel],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every channel currently active (no timeout filtering — see
    /// [`Self::reap_expired`] for eviction).
    pub fn list_active(&self) -> Result<Vec<ActiveMode>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT channel_id, entered_at, last_activity, instance_id FROM active_modes",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActiveMode {
                    channel_id: row.get(0)?,
                    entered_at: row.get(1)?,
                    last_activity: row.get(2)?,
                    instance_id: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Evict channels where `now - last_activity > timeout_minutes` (P8).
    /// Returns the evicted channel ids.
    #[instrument(skip(self))]
    pub fn reap_expired(&self, timeout_minutes: u64) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::minutes(timeout_minutes as i64);
        let cutoff_str = cutoff.to_rfc3339();

        let mut stmt = db.prepare(
            "SELECT channel_id FROM active_modes WHERE last_activity < ?1",
        )?;
        let expired: Vec<String> = stmt
            .query_map(params![cutoff_str], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        if !expired.is_empty() {
            db.execute(
                "DELETE FROM active_modes WHERE last_activity < ?1",
                params![cutoff_str],
            )?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params as sql_params;

    fn open() -> ActiveModeRegistry {
        ActiveModeRegistry::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn enter_then_list_active() {
        let reg = open();
        reg.enter("chat:general", "instance-a").unwrap();
        let active = reg.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].channel_id, "chat:general");
    }

    #[test]
    fn enter_is_idempotent_and_preserves_entered_at() {
        let reg = open();
        reg.enter("chat:general", "instance-a").unwrap();
        let first = reg.list_active().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        reg.enter("chat:general", "instance-b").unwrap();
        let second = reg.list_active().unwrap();
        assert_eq!(first[0].entered_at, second[0].entered_at);
    }

    #[test]
    fn exit_removes_channel() {
        let reg = open();
        reg.enter("chat:general", "instance-a").unwrap();
        reg.exit("chat:general").unwrap();
        assert!(!reg.is_active("chat:general").unwrap());
    }

    #[test]
    fn reap_expired_evicts_only_stale_channels() {
        let reg = open();
        reg.enter("chat:stale", "instance-a").unwrap();
        reg.enter("chat:fresh", "instance-a").unwrap();

        // Backdate chat:stale's last_activity far into the past.
        {
            let db = reg.db.lock().unwrap();
            db.execute(
                "UPDATE active_modes SET last_activity = ?1 WHERE channel_id = 'chat:stale'",
                sql_params!["2000-01-01T00:00:00Z"],
            )
            .unwrap();
        }

        let evicted = reg.reap_expired(DEFAULT_TIMEOUT_MINUTES).unwrap();
        assert_eq!(evicted, vec!["chat:stale".to_string()]);
        assert!(reg.is_active("chat:fresh").unwrap());
        assert!(!reg.is_active("chat:stale").unwrap());
    }
}
