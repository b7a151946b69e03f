//! Message repository: append-only rows plus the FTS5 index, embedding
//! backfill, retrieval primitives for the context engine, and retention.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use tracing::debug;

use gryag_core::types::Role;

use crate::db::Db;
use crate::embedding;
use crate::error::Result;
use crate::types::{NewMessage, StoredMessage};

#[derive(Clone)]
pub struct MessageStore {
    db: Db,
}

impl MessageStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a message and sync the FTS index. Returns the rowid, which is
    /// monotonic per database.
    pub fn append(&self, msg: &NewMessage) -> Result<i64> {
        let conn = self.db.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages
             (chat_id, thread_id, user_id, role, text, media_json, metadata_json,
              external_message_id, reply_to_external_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                msg.chat_id,
                msg.thread_id,
                msg.user_id,
                msg.role.to_string(),
                msg.text,
                msg.media_json,
                msg.metadata_json,
                msg.external_message_id,
                msg.reply_to_external_message_id,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        if !msg.text.trim().is_empty() {
            conn.execute(
                "INSERT INTO messages_fts(rowid, text) VALUES (?1, ?2)",
                params![id, msg.text],
            )?;
        }
        Ok(id)
    }

    /// Newest-first recent messages. When `thread_id` is set but the thread
    /// has no rows yet, degrades to the chat-level query.
    pub fn recent(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        if let Some(tid) = thread_id {
            let rows = self.query_recent(
                "SELECT * FROM messages WHERE chat_id = ?1 AND thread_id = ?2
                 ORDER BY id DESC LIMIT ?3",
                params![chat_id, tid, limit],
            )?;
            if !rows.is_empty() {
                return Ok(rows);
            }
        }
        self.query_recent(
            "SELECT * FROM messages WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2",
            params![chat_id, limit],
        )
    }

    fn query_recent(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Attach an embedding to a stored message. No-op when the row has
    /// already been pruned.
    pub fn update_embedding(&self, id: i64, vec: &[f32]) -> Result<()> {
        let blob = embedding::encode(vec)?;
        let conn = self.db.lock();
        let n = conn.execute(
            "UPDATE messages SET embedding = ?1 WHERE id = ?2",
            params![blob, id],
        )?;
        if n == 0 {
            debug!(message_id = id, "embedding update skipped: row gone");
        }
        Ok(())
    }

    /// Full-text candidates for the hybrid engine. Falls back to a substring
    /// scan when the FTS query cannot be parsed.
    pub fn keyword_candidates(
        &self,
        chat_id: i64,
        query: &str,
        k: usize,
    ) -> Result<Vec<StoredMessage>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let fts: rusqlite::Result<Vec<StoredMessage>> = (|| {
            let conn = self.db.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT m.* FROM messages m
                 JOIN messages_fts f ON m.id = f.rowid
                 WHERE m.chat_id = ?1 AND messages_fts MATCH ?2
                 ORDER BY rank LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![chat_id, fts_query, k], row_to_message)?;
            rows.collect()
        })();
        match fts {
            Ok(rows) => Ok(rows),
            Err(e) => {
                debug!(error = %e, "FTS query failed, falling back to substring match");
                self.query_recent(
                    "SELECT * FROM messages WHERE chat_id = ?1 AND text LIKE ?2
                     ORDER BY id DESC LIMIT ?3",
                    params![chat_id, format!("%{}%", query.trim()), k],
                )
            }
        }
    }

    /// The most recent messages in a chat that carry an embedding, decoded.
    pub fn recent_embedded(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<(StoredMessage, Vec<f32>)>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM messages
             WHERE chat_id = ?1 AND embedding IS NOT NULL
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, limit], |row| {
            let msg = row_to_message(row)?;
            let blob: Vec<u8> = row.get("embedding")?;
            Ok((msg, blob))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(msg, blob)| embedding::decode(&blob).ok().map(|v| (msg, v)))
            .collect())
    }

    /// Chats with at least one message since `since` (summarizer input).
    pub fn active_chats(&self, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT chat_id FROM messages WHERE created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Render a bounded chat log for the summarizer: reverse-chronological
    /// truncation to `max_chars`, returned oldest-first.
    pub fn chat_log(
        &self,
        chat_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_chars: usize,
    ) -> Result<String> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT user_id, role, text FROM messages
             WHERE chat_id = ?1 AND created_at >= ?2 AND created_at < ?3
               AND text != ''
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(
            params![chat_id, start.to_rfc3339(), end.to_rfc3339()],
            |row| {
                let user_id: Option<i64> = row.get(0)?;
                let role: String = row.get(1)?;
                let text: String = row.get(2)?;
                Ok((user_id, role, text))
            },
        )?;

        let mut lines: Vec<String> = Vec::new();
        let mut total = 0usize;
        for r in rows.filter_map(|r| r.ok()) {
            let (user_id, role, text) = r;
            let who = match user_id {
                Some(id) if role == "user" => format!("user {id}"),
                _ => role,
            };
            let line = format!("[{who}] {text}");
            if total + line.len() > max_chars {
                break;
            }
            total += line.len() + 1;
            lines.push(line);
        }
        lines.reverse();
        Ok(lines.join("\n"))
    }

    /// Delete messages older than `cutoff`; rebuilds the FTS index after a
    /// bulk delete. Returns the number of rows removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock();
        let n = conn.execute(
            "DELETE FROM messages WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        if n > 0 {
            conn.execute_batch("INSERT INTO messages_fts(messages_fts) VALUES('rebuild');")?;
        }
        Ok(n)
    }

    /// Wipe a chat's history (admin /reset).
    pub fn clear_chat(&self, chat_id: i64) -> Result<usize> {
        let conn = self.db.lock();
        let n = conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        if n > 0 {
            conn.execute_batch("INSERT INTO messages_fts(messages_fts) VALUES('rebuild');")?;
        }
        Ok(n)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.lock();
        let n = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn count_for_chat(&self, chat_id: i64) -> Result<i64> {
        let conn = self.db.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

/// Quote every whitespace token so user text cannot inject FTS5 syntax.
fn build_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get("role")?;
    let created: String = row.get("created_at")?;
    Ok(StoredMessage {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        thread_id: row.get("thread_id")?,
        user_id: row.get("user_id")?,
        role: role.parse().unwrap_or(Role::User),
        text: row.get::<_, Option<String>>("text")?.unwrap_or_default(),
        media_json: row.get("media_json")?,
        metadata_json: row.get("metadata_json")?,
        external_message_id: row.get("external_message_id")?,
        reply_to_external_message_id: row.get("reply_to_external_message_id")?,
        created_at: parse_ts(&created),
    })
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::new(Db::open_in_memory().unwrap())
    }

    fn user_msg(chat_id: i64, thread_id: Option<i64>, user_id: i64, text: &str) -> NewMessage {
        NewMessage {
            chat_id,
            thread_id,
            user_id: Some(user_id),
            role: Role::User,
            text: text.to_string(),
            media_json: None,
            metadata_json: None,
            external_message_id: None,
            reply_to_external_message_id: None,
        }
    }

    #[test]
    fn append_returns_monotonic_ids() {
        let s = store();
        let a = s.append(&user_msg(100, None, 1, "перше")).unwrap();
        let b = s.append(&user_msg(100, None, 1, "друге")).unwrap();
        assert!(b > a);
    }

    #[test]
    fn recent_is_newest_first() {
        let s = store();
        for i in 0..5 {
            s.append(&user_msg(100, None, 1, &format!("msg {i}"))).unwrap();
        }
        let rows = s.recent(100, None, 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].text, "msg 4");
        assert_eq!(rows[2].text, "msg 2");
    }

    #[test]
    fn thread_scope_falls_back_to_chat() {
        let s = store();
        s.append(&user_msg(100, None, 1, "chat level")).unwrap();
        let rows = s.recent(100, Some(7), 10).unwrap();
        assert_eq!(rows.len(), 1);

        s.append(&user_msg(100, Some(7), 1, "in thread")).unwrap();
        let rows = s.recent(100, Some(7), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "in thread");
    }

    #[test]
    fn update_embedding_missing_row_is_noop() {
        let s = store();
        s.update_embedding(9999, &[0.1, 0.2]).unwrap();
    }

    #[test]
    fn embedding_round_trips_through_store() {
        let s = store();
        let id = s.append(&user_msg(1, None, 1, "з ембедінгом")).unwrap();
        s.update_embedding(id, &[0.5, -0.25]).unwrap();
        let rows = s.recent_embedded(1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, vec![0.5, -0.25]);
    }

    #[test]
    fn keyword_search_finds_text() {
        let s = store();
        s.append(&user_msg(1, None, 1, "сьогодні їли борщ із пампушками"))
            .unwrap();
        s.append(&user_msg(1, None, 2, "погода жахлива")).unwrap();
        let rows = s.keyword_candidates(1, "борщ", 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].text.contains("борщ"));
    }

    #[test]
    fn keyword_search_quotes_fts_syntax() {
        let s = store();
        s.append(&user_msg(1, None, 1, "щось про дужки")).unwrap();
        // Raw parens would be an FTS5 syntax error if left unquoted.
        let rows = s.keyword_candidates(1, "(дужки)", 5);
        assert!(rows.is_ok());
    }

    #[test]
    fn prune_removes_nothing_for_old_cutoff() {
        let s = store();
        s.append(&user_msg(1, None, 1, "лишаюсь")).unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(365);
        assert_eq!(s.prune_before(cutoff).unwrap(), 0);
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn clear_chat_scopes_to_one_chat() {
        let s = store();
        s.append(&user_msg(1, None, 1, "a")).unwrap();
        s.append(&user_msg(2, None, 1, "b")).unwrap();
        assert_eq!(s.clear_chat(1).unwrap(), 1);
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn chat_log_truncates_from_the_old_end() {
        let s = store();
        for i in 0..10 {
            s.append(&user_msg(1, None, 1, &format!("line number {i}")))
                .unwrap();
        }
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now() + chrono::Duration::days(1);
        let log = s.chat_log(1, start, end, 60).unwrap();
        // Newest lines survive; oldest are dropped.
        assert!(log.contains("line number 9"));
        assert!(!log.contains("line number 0"));
    }
}
