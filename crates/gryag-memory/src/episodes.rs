//! Episode repository. Episode bodies are immutable; retrieval bumps
//! `last_accessed` and `access_count` so the context engine can prefer
//! episodes that keep proving useful.

use chrono::Utc;
use rusqlite::params;

use crate::db::Db;
use crate::embedding;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::{EmotionalValence, Episode, NewEpisode};

#[derive(Clone)]
pub struct EpisodeStore {
    db: Db,
}

impl EpisodeStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn insert(&self, ep: &NewEpisode) -> Result<i64> {
        let conn = self.db.lock();
        let now = Utc::now().to_rfc3339();
        let blob = match &ep.summary_embedding {
            Some(vec) => Some(embedding::encode(vec)?),
            None => None,
        };
        conn.execute(
            "INSERT INTO episodes
             (chat_id, thread_id, topic, summary, summary_embedding, importance,
              emotional_valence, message_ids_json, participant_ids_json, tags_json,
              created_at, last_accessed, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, 0)",
            params![
                ep.chat_id,
                ep.thread_id,
                ep.topic,
                ep.summary,
                blob,
                ep.importance.clamp(0.0, 1.0),
                ep.emotional_valence.to_string(),
                serde_json::to_string(&ep.message_ids)?,
                serde_json::to_string(&ep.participant_ids)?,
                serde_json::to_string(&ep.tags)?,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// High-importance episodes for a chat, marking them accessed.
    pub fn recall(&self, chat_id: i64, min_importance: f64, limit: usize) -> Result<Vec<Episode>> {
        let episodes: Vec<Episode> = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM episodes
                 WHERE chat_id = ?1 AND importance >= ?2
                 ORDER BY last_accessed DESC, importance DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![chat_id, min_importance, limit], row_to_episode)?;
            rows.filter_map(|r| r.ok()).collect()
        };

        if !episodes.is_empty() {
            let now = Utc::now().to_rfc3339();
            let conn = self.db.lock();
            for ep in &episodes {
                conn.execute(
                    "UPDATE episodes SET last_accessed = ?1, access_count = access_count + 1
                     WHERE id = ?2",
                    params![now, ep.id],
                )?;
            }
        }
        Ok(episodes)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.lock();
        let n = conn.query_row("SELECT COUNT(*) FROM episodes", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn count_for_chat(&self, chat_id: i64) -> Result<i64> {
        let conn = self.db.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Episode> {
    let valence: String = row.get("emotional_valence")?;
    let created: String = row.get("created_at")?;
    let accessed: String = row.get("last_accessed")?;
    let message_ids: String = row.get("message_ids_json")?;
    let participant_ids: String = row.get("participant_ids_json")?;
    let tags: String = row.get("tags_json")?;
    Ok(Episode {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        thread_id: row.get("thread_id")?,
        topic: row.get("topic")?,
        summary: row.get("summary")?,
        importance: row.get("importance")?,
        emotional_valence: valence.parse().unwrap_or(EmotionalValence::Neutral),
        message_ids: serde_json::from_str(&message_ids).unwrap_or_default(),
        participant_ids: serde_json::from_str(&participant_ids).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: parse_ts(&created),
        last_accessed: parse_ts(&accessed),
        access_count: row.get("access_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(chat_id: i64, importance: f64) -> NewEpisode {
        NewEpisode {
            chat_id,
            thread_id: Some(7),
            topic: "плани на вихідні".into(),
            summary: "обговорили похід у Карпати".into(),
            summary_embedding: Some(vec![0.1, 0.2, 0.3]),
            importance,
            emotional_valence: EmotionalValence::Positive,
            message_ids: vec![1, 2, 3, 4, 5],
            participant_ids: vec![42, 43],
            tags: vec!["подорожі".into()],
        }
    }

    #[test]
    fn insert_and_recall_round_trip() {
        let s = EpisodeStore::new(Db::open_in_memory().unwrap());
        s.insert(&sample(200, 0.8)).unwrap();
        let eps = s.recall(200, 0.6, 5).unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].message_ids.len(), 5);
        assert_eq!(eps[0].thread_id, Some(7));
        assert_eq!(eps[0].participant_ids, vec![42, 43]);
    }

    #[test]
    fn recall_bumps_access_count() {
        let s = EpisodeStore::new(Db::open_in_memory().unwrap());
        s.insert(&sample(200, 0.8)).unwrap();
        s.recall(200, 0.0, 5).unwrap();
        let eps = s.recall(200, 0.0, 5).unwrap();
        assert_eq!(eps[0].access_count, 1);
    }

    #[test]
    fn recall_filters_by_importance() {
        let s = EpisodeStore::new(Db::open_in_memory().unwrap());
        s.insert(&sample(200, 0.3)).unwrap();
        assert!(s.recall(200, 0.6, 5).unwrap().is_empty());
    }
}
