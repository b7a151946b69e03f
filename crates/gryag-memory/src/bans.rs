//! Ban repository. Banned users are silently dropped; at most one notice is
//! sent per cooldown, tracked via `last_notice_at`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::BanRecord;

#[derive(Clone)]
pub struct BanStore {
    db: Db,
}

impl BanStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn ban(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO bans (chat_id, user_id, banned_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, user_id) DO NOTHING",
            params![chat_id, user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unban(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let conn = self.db.lock();
        let n = conn.execute(
            "DELETE FROM bans WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
        )?;
        Ok(n > 0)
    }

    pub fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<BanRecord>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT chat_id, user_id, banned_at, last_notice_at FROM bans
                 WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
                |row| {
                    let banned: String = row.get(2)?;
                    let notice: Option<String> = row.get(3)?;
                    Ok(BanRecord {
                        chat_id: row.get(0)?,
                        user_id: row.get(1)?,
                        banned_at: parse_ts(&banned),
                        last_notice_at: notice.as_deref().map(parse_ts),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn is_banned(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.get(chat_id, user_id)?.is_some())
    }

    /// True at most once per cooldown: when due, the notice timestamp is
    /// advanced in the same call so concurrent turns cannot double-notify.
    pub fn notice_due(
        &self,
        chat_id: i64,
        user_id: i64,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(record) = self.get(chat_id, user_id)? else {
            return Ok(false);
        };
        let due = match record.last_notice_at {
            None => true,
            Some(last) => now - last >= cooldown,
        };
        if due {
            let conn = self.db.lock();
            conn.execute(
                "UPDATE bans SET last_notice_at = ?1 WHERE chat_id = ?2 AND user_id = ?3",
                params![now.to_rfc3339(), chat_id, user_id],
            )?;
        }
        Ok(due)
    }
}
