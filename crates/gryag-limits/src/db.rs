//! Quota tables. This crate owns them; they live in the same database file
//! as everything else and are initialised idempotently on startup.

use gryag_memory::Db;

use crate::error::Result;

pub fn init_db(db: &Db) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feature_usage (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      INTEGER NOT NULL,
                feature      TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                throttled    INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_usage_user_feature
                ON feature_usage(user_id, feature, requested_at DESC);

            CREATE TABLE IF NOT EXISTS reputation (
                user_id    INTEGER PRIMARY KEY,
                multiplier REAL NOT NULL DEFAULT 1.0
            );",
        )
    })?;
    Ok(())
}
