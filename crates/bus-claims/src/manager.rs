use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::error::Result;

/// Claim TTL (§3): a claim is live iff `expires_at > now`.
pub const CLAIM_TTL_SECONDS: i64 = 30;

/// Per-(channel, message) exclusive claim store (C3, §4.3).
///
/// `try_claim` is the only operation that needs correctness under
/// concurrent callers: expired-row cleanup plus insert happen inside one
/// transaction, so the `PRIMARY KEY(channel_id, message_id)` constraint
/// is the sole arbiter of "exactly one instance wins" (P1) — no
/// additional locking beyond the transaction itself.
pub struct ClaimStore {
    db: Mutex<Connection>,
    ttl: Duration,
}

impl ClaimStore {
    pub fn new(conn: Connection, ttl_seconds: u64) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            ttl: Duration::from_secs(ttl_seconds),
        })
    }

    pub fn with_default_ttl(conn: Connection) -> Result<Self> {
        Self::new(conn, CLAIM_TTL_SECONDS as u64)
    }

    /// Delete expired rows, then attempt to insert `(channel, message)`.
    /// Returns `true` iff this instance now holds the claim.
    #[instrument(skip(self), fields(channel, message_id, instance))]
    pub fn try_claim(&self, channel: &str, message_id: i64, instance: &str) -> Result<bool> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let now: DateTime<Utc> = Utc::now();
        let now_str = now.to_rfc3339();
        tx.execute("DELETE FROM claims WHERE expires_at < ?1", params![now_str])?;

        let expires = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let result = tx.execute(
            "INSERT INTO claims (channel_id, message_id, instance_id, claimed_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![channel, message_id, instance, now_str, expires.to_rfc3339()],
        );

        let claimed = match result {
            Ok(_) => true,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                false
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit()?;
        debug!(claimed, "try_claim result");
        Ok(claimed)
    }

    /// Release a claim — only deletes rows owned by `instance` (a peer
    /// cannot release another instance's live claim).
    pub fn release(&self, channel: &str, message_id: i64, instance: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM claims WHERE channel_id = ?1 AND message_id = ?2 AND instance_id = ?3",
            params![channel, message_id, instance],
        )?;
        Ok(())
    }

    /// Delete all expired rows, returning the count removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = db.execute("DELETE FROM claims WHERE expires_at < ?1", params![now])?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> ClaimStore {
        ClaimStore::with_default_ttl(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn only_one_instance_wins_the_claim() {
        let store = open();
        let a = store.try_claim("chat:general", 1, "instance-a").unwrap();
        let b = store.try_claim("chat:general", 1, "instance-b").unwrap();
        assert!(a);
        assert!(!b);
    }

    #[test]
    fn release_only_removes_owned_rows() {
        let store = open();
        assert!(store.try_claim("chat:general", 1, "instance-a").unwrap());
        // instance-b releasing a claim it doesn't own is a no-op.
        store.release("chat:general", 1, "instance-b").unwrap();
        assert!(!store.try_claim("chat:general", 1, "instance-b").unwrap());

        store.release("chat:general", 1, "instance-a").unwrap();
        assert!(store.try_claim("chat:general", 1, "instance-b").unwrap());
    }

    #[test]
    fn expired_claims_are_reclaimable() {
        let store = ClaimStore::new(Connection::open_in_memory().unwrap(), 0).unwrap();
        assert!(store.try_claim("chat:general", 1, "instance-a").unwrap());
        // TTL of 0s means the claim is already expired by the next call.
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.try_claim("chat:general", 1, "instance-b").unwrap());
    }

    #[test]
    fn sweep_expired_removes_stale_rows_only() {
        let store = ClaimStore::new(Connection::open_in_memory().unwrap(), 0).unwrap();
        store.try_claim("chat:general", 1, "instance-a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let live_store = open();
        live_store.try_claim("chat:general", 2, "instance-a").unwrap();

        let removed = store.sweep_expired().unwrap();
        assert_eq!(removed, 1);
    }
}
