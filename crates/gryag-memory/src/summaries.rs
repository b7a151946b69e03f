//! Chat rollup repository. One row per `(chat_id, kind, period_start)`;
//! re-running the summarizer for the same window overwrites in place.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Db;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::{ChatSummary, SummaryKind};

#[derive(Clone)]
pub struct SummaryStore {
    db: Db,
}

impl SummaryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn upsert(
        &self,
        chat_id: i64,
        kind: SummaryKind,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        text: &str,
        token_count: usize,
    ) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO chat_summaries
             (chat_id, kind, period_start, period_end, text, token_count, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(chat_id, kind, period_start) DO UPDATE SET
                 period_end = excluded.period_end,
                 text = excluded.text,
                 token_count = excluded.token_count,
                 generated_at = excluded.generated_at",
            params![
                chat_id,
                kind.as_str(),
                period_start.to_rfc3339(),
                period_end.to_rfc3339(),
                text,
                token_count,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent summary of a kind for a chat.
    pub fn latest(&self, chat_id: i64, kind: SummaryKind) -> Result<Option<ChatSummary>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT * FROM chat_summaries
                 WHERE chat_id = ?1 AND kind = ?2
                 ORDER BY period_start DESC LIMIT 1",
                params![chat_id, kind.as_str()],
                row_to_summary,
            )
            .optional()?;
        Ok(row)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSummary> {
    let kind: String = row.get("kind")?;
    let start: String = row.get("period_start")?;
    let end: String = row.get("period_end")?;
    let generated: String = row.get("generated_at")?;
    Ok(ChatSummary {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        kind: kind.parse().unwrap_or(SummaryKind::Week),
        period_start: parse_ts(&start),
        period_end: parse_ts(&end),
        text: row.get("text")?,
        token_count: row.get::<_, i64>("token_count")? as usize,
        generated_at: parse_ts(&generated),
    })
}
