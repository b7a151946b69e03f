//! Media cache: TTL-bounded pointers to downloaded files, consumed by the
//! image tools. Pruned alongside message retention.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::MediaCacheEntry;

#[derive(Clone)]
pub struct MediaCache {
    db: Db,
}

impl MediaCache {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn put(&self, entry: &MediaCacheEntry) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO media_cache
             (media_id, chat_id, user_id, file_path, media_type, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(media_id) DO UPDATE SET
                 file_path = excluded.file_path,
                 expires_at = excluded.expires_at",
            params![
                entry.media_id,
                entry.chat_id,
                entry.user_id,
                entry.file_path,
                entry.media_type,
                entry.expires_at.to_rfc3339(),
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch an entry unless it has expired.
    pub fn get(&self, media_id: &str, now: DateTime<Utc>) -> Result<Option<MediaCacheEntry>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT media_id, chat_id, user_id, file_path, media_type,
                        expires_at, created_at
                 FROM media_cache WHERE media_id = ?1",
                params![media_id],
                |row| {
                    let expires: String = row.get(5)?;
                    let created: String = row.get(6)?;
                    Ok(MediaCacheEntry {
                        media_id: row.get(0)?,
                        chat_id: row.get(1)?,
                        user_id: row.get(2)?,
                        file_path: row.get(3)?,
                        media_type: row.get(4)?,
                        expires_at: parse_ts(&expires),
                        created_at: parse_ts(&created),
                    })
                },
            )
            .optional()?;
        Ok(row.filter(|e| e.expires_at > now))
    }

    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock();
        let n = conn.execute(
            "DELETE FROM media_cache WHERE expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, expires_in: Duration) -> MediaCacheEntry {
        MediaCacheEntry {
            media_id: id.into(),
            chat_id: 100,
            user_id: Some(42),
            file_path: format!("/tmp/{id}.jpg"),
            media_type: "image/jpeg".into(),
            expires_at: Utc::now() + expires_in,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expired_entries_are_invisible_and_pruned() {
        let c = MediaCache::new(Db::open_in_memory().unwrap());
        c.put(&entry("fresh", Duration::hours(1))).unwrap();
        c.put(&entry("stale", Duration::hours(-1))).unwrap();

        let now = Utc::now();
        assert!(c.get("fresh", now).unwrap().is_some());
        assert!(c.get("stale", now).unwrap().is_none());
        assert_eq!(c.prune_expired(now).unwrap(), 1);
    }
}
