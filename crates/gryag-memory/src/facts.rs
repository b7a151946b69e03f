//! Fact repository. Facts are deduplicated assertions about a user or a
//! chat; re-observation reinforces confidence, never reduces it, and value
//! changes leave an audit row behind.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::db::Db;
use crate::error::Result;
use crate::store::parse_ts;
use crate::types::{EntityType, Fact, FactCandidate, FactCategory, FusionOutcome};

/// Facts decayed below this confidence floor are deactivated.
const DECAY_FLOOR: f64 = 0.2;

#[derive(Clone)]
pub struct FactStore {
    db: Db,
}

impl FactStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or fuse a candidate with the existing fact under the same
    /// unique key.
    ///
    /// Fusion: `new_confidence = min(1, old + 0.1 × candidate.confidence)`;
    /// `evidence_count` and `last_reinforced` always advance. A semantically
    /// different value writes a `fact_versions` row: the higher-confidence
    /// value stays active.
    pub fn upsert(&self, cand: &FactCandidate) -> Result<FusionOutcome> {
        let conn = self.db.lock();
        let now = Utc::now().to_rfc3339();

        let existing: Option<(i64, String, f64)> = conn
            .query_row(
                "SELECT id, value, confidence FROM facts
                 WHERE entity_type = ?1 AND entity_id = ?2
                   AND chat_context IS ?3 AND category = ?4 AND key = ?5",
                params![
                    cand.entity_type.to_string(),
                    cand.entity_id,
                    cand.chat_context,
                    cand.category.to_string(),
                    cand.key,
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, old_value, old_conf)) = existing else {
            conn.execute(
                "INSERT INTO facts
                 (entity_type, entity_id, chat_context, category, key, value,
                  confidence, evidence_count, evidence_text, source_message_id,
                  first_observed, last_reinforced, is_active, decay_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?10, 1, 0)",
                params![
                    cand.entity_type.to_string(),
                    cand.entity_id,
                    cand.chat_context,
                    cand.category.to_string(),
                    cand.key,
                    cand.value,
                    cand.confidence.clamp(0.0, 1.0),
                    cand.evidence_text,
                    cand.source_message_id,
                    now,
                ],
            )?;
            return Ok(FusionOutcome::Inserted);
        };

        let fused = (old_conf + 0.1 * cand.confidence).min(1.0);

        if normalize(&old_value) == normalize(&cand.value) {
            conn.execute(
                "UPDATE facts SET confidence = ?1, evidence_count = evidence_count + 1,
                     last_reinforced = ?2, is_active = 1
                 WHERE id = ?3",
                params![fused, now, id],
            )?;
            return Ok(FusionOutcome::Reinforced);
        }

        // Value changed. The higher-confidence version stays active; either
        // way the change is recorded.
        let candidate_wins = cand.confidence > old_conf;
        let change_type = if candidate_wins { "evolution" } else { "contradiction" };
        conn.execute(
            "INSERT INTO fact_versions (fact_id, previous_value, new_value, change_type, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, old_value, cand.value, change_type, now],
        )?;

        if candidate_wins {
            conn.execute(
                "UPDATE facts SET value = ?1, confidence = ?2,
                     evidence_count = evidence_count + 1, last_reinforced = ?3,
                     evidence_text = ?4, is_active = 1
                 WHERE id = ?5",
                params![
                    cand.value,
                    cand.confidence.clamp(0.0, 1.0),
                    now,
                    cand.evidence_text,
                    id
                ],
            )?;
            Ok(FusionOutcome::Evolved)
        } else {
            conn.execute(
                "UPDATE facts SET evidence_count = evidence_count + 1, last_reinforced = ?1
                 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(FusionOutcome::Contradicted)
        }
    }

    /// Active facts for an entity, most confident first within category.
    /// `chat_context = None` returns facts from every chat.
    pub fn get_facts(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        chat_context: Option<i64>,
    ) -> Result<Vec<Fact>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM facts
             WHERE entity_type = ?1 AND entity_id = ?2 AND is_active = 1
               AND (?3 IS NULL OR chat_context IS ?3)
             ORDER BY category, confidence DESC",
        )?;
        let rows = stmt.query_map(
            params![entity_type.to_string(), entity_id, chat_context],
            row_to_fact,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn deactivate(&self, id: i64) -> Result<()> {
        let conn = self.db.lock();
        conn.execute("UPDATE facts SET is_active = 0 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Remove all facts for an entity (admin reset).
    pub fn clear(&self, entity_type: EntityType, entity_id: i64) -> Result<usize> {
        let conn = self.db.lock();
        let n = conn.execute(
            "DELETE FROM facts WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.to_string(), entity_id],
        )?;
        Ok(n)
    }

    /// Deactivate facts whose decayed confidence fell under the floor:
    /// `confidence - decay_rate × age_days(last_reinforced) < 0.2`.
    pub fn apply_decay(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows: Vec<(i64, f64, f64, String)> = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT id, confidence, decay_rate, last_reinforced FROM facts
                 WHERE is_active = 1 AND decay_rate > 0",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.filter_map(|r| r.ok()).collect()
        };

        let mut expired = 0usize;
        for (id, confidence, decay_rate, last_reinforced) in rows {
            let age_days = (now - parse_ts(&last_reinforced)).num_days().max(0) as f64;
            if confidence - decay_rate * age_days < DECAY_FLOOR {
                self.deactivate(id)?;
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "facts deactivated by decay");
        }
        Ok(expired)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM facts WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

/// Normalized-value equality: case- and whitespace-insensitive.
fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let entity: String = row.get("entity_type")?;
    let category: String = row.get("category")?;
    let first: String = row.get("first_observed")?;
    let last: String = row.get("last_reinforced")?;
    Ok(Fact {
        id: row.get("id")?,
        entity_type: entity.parse().unwrap_or(EntityType::User),
        entity_id: row.get("entity_id")?,
        chat_context: row.get("chat_context")?,
        category: category.parse().unwrap_or(FactCategory::Personal),
        key: row.get("key")?,
        value: row.get("value")?,
        confidence: row.get("confidence")?,
        evidence_count: row.get("evidence_count")?,
        evidence_text: row.get("evidence_text")?,
        source_message_id: row.get("source_message_id")?,
        first_observed: parse_ts(&first),
        last_reinforced: parse_ts(&last),
        is_active: row.get::<_, i64>("is_active")? != 0,
        decay_rate: row.get("decay_rate")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FactStore {
        FactStore::new(Db::open_in_memory().unwrap())
    }

    fn location(value: &str, confidence: f64) -> FactCandidate {
        FactCandidate {
            entity_type: EntityType::User,
            entity_id: 42,
            chat_context: Some(100),
            category: FactCategory::Personal,
            key: "location".into(),
            value: value.into(),
            confidence,
            evidence_text: Some("я з Києва".into()),
            source_message_id: None,
        }
    }

    #[test]
    fn first_observation_inserts() {
        let s = store();
        assert_eq!(s.upsert(&location("Kyiv", 0.85)).unwrap(), FusionOutcome::Inserted);
        let facts = s.get_facts(EntityType::User, 42, Some(100)).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "Kyiv");
        assert!(facts[0].confidence >= 0.8);
        assert_eq!(facts[0].evidence_count, 1);
    }

    #[test]
    fn reinforcement_raises_confidence_and_evidence() {
        let s = store();
        s.upsert(&location("Kyiv", 0.85)).unwrap();
        let before = s.get_facts(EntityType::User, 42, Some(100)).unwrap()[0].clone();
        assert_eq!(
            s.upsert(&location("kyiv", 0.85)).unwrap(),
            FusionOutcome::Reinforced
        );
        let after = s.get_facts(EntityType::User, 42, Some(100)).unwrap()[0].clone();
        assert_eq!(after.evidence_count, before.evidence_count + 1);
        assert!(after.confidence >= before.confidence);
        assert!(after.last_reinforced >= before.last_reinforced);
    }

    #[test]
    fn confidence_caps_at_one() {
        let s = store();
        s.upsert(&location("Kyiv", 1.0)).unwrap();
        for _ in 0..20 {
            s.upsert(&location("Kyiv", 1.0)).unwrap();
        }
        let fact = &s.get_facts(EntityType::User, 42, Some(100)).unwrap()[0];
        assert!(fact.confidence <= 1.0);
    }

    #[test]
    fn higher_confidence_contradiction_wins() {
        let s = store();
        s.upsert(&location("Kyiv", 0.6)).unwrap();
        assert_eq!(
            s.upsert(&location("Lviv", 0.9)).unwrap(),
            FusionOutcome::Evolved
        );
        let fact = &s.get_facts(EntityType::User, 42, Some(100)).unwrap()[0];
        assert_eq!(fact.value, "Lviv");
    }

    #[test]
    fn lower_confidence_contradiction_loses() {
        let s = store();
        s.upsert(&location("Kyiv", 0.9)).unwrap();
        assert_eq!(
            s.upsert(&location("Lviv", 0.5)).unwrap(),
            FusionOutcome::Contradicted
        );
        let fact = &s.get_facts(EntityType::User, 42, Some(100)).unwrap()[0];
        assert_eq!(fact.value, "Kyiv");
    }

    #[test]
    fn chat_context_separates_facts() {
        let s = store();
        s.upsert(&location("Kyiv", 0.8)).unwrap();
        let mut other = location("Lviv", 0.8);
        other.chat_context = Some(200);
        s.upsert(&other).unwrap();
        assert_eq!(s.get_facts(EntityType::User, 42, Some(100)).unwrap().len(), 1);
        assert_eq!(s.get_facts(EntityType::User, 42, None).unwrap().len(), 2);
    }

    #[test]
    fn decay_deactivates_stale_low_confidence() {
        let s = store();
        s.upsert(&location("Kyiv", 0.5)).unwrap();
        {
            let conn = s.db.lock();
            conn.execute(
                "UPDATE facts SET decay_rate = 0.1, last_reinforced = ?1",
                params![(Utc::now() - Duration::days(30)).to_rfc3339()],
            )
            .unwrap();
        }
        assert_eq!(s.apply_decay(Utc::now()).unwrap(), 1);
        assert!(s.get_facts(EntityType::User, 42, Some(100)).unwrap().is_empty());
    }
}
