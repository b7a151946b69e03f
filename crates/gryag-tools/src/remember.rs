//! Explicit memory tool: the model stores a fact a user asked it to keep.

use async_trait::async_trait;
use serde_json::{json, Value};

use gryag_memory::facts::FactStore;
use gryag_memory::types::{EntityType, FactCandidate, FactCategory};

use crate::{Tool, ToolResult};

/// Facts stored on explicit request carry high confidence.
const EXPLICIT_CONFIDENCE: f64 = 0.95;

pub struct RememberTool {
    facts: FactStore,
    chat_id: i64,
    /// The speaker of the current turn; the tool refuses to write facts
    /// about anyone else.
    user_id: i64,
}

impl RememberTool {
    pub fn new(facts: FactStore, chat_id: i64, user_id: i64) -> Self {
        Self {
            facts,
            chat_id,
            user_id,
        }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember_fact"
    }

    fn description(&self) -> &str {
        "Запам'ятовує факт про співрозмовника, коли той прямо про це просить"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": ["personal", "preference", "profession", "interest", "opinion", "relationship"]
                },
                "key": {"type": "string"},
                "value": {"type": "string"}
            },
            "required": ["category", "key", "value"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let category = args
            .get("category")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<FactCategory>().ok());
        let key = args.get("key").and_then(Value::as_str);
        let value = args.get("value").and_then(Value::as_str);
        let (Some(category), Some(key), Some(value)) = (category, key, value) else {
            return ToolResult::error("category, key, value required");
        };

        let candidate = FactCandidate {
            entity_type: EntityType::User,
            entity_id: self.user_id,
            chat_context: Some(self.chat_id),
            category,
            key: key.trim().to_lowercase(),
            value: value.trim().to_string(),
            confidence: EXPLICIT_CONFIDENCE,
            evidence_text: Some("збережено на прохання користувача".into()),
            source_message_id: None,
        };
        match self.facts.upsert(&candidate) {
            Ok(_) => ToolResult::success(json!({"remembered": {"key": candidate.key, "value": candidate.value}})),
            Err(e) => ToolResult::error(format!("не вдалося зберегти: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gryag_memory::Db;

    #[tokio::test]
    async fn stores_a_fact_for_the_speaker() {
        let facts = FactStore::new(Db::open_in_memory().unwrap());
        let tool = RememberTool::new(facts.clone(), 100, 42);
        let out = tool
            .execute(json!({"category": "preference", "key": "music", "value": "джаз"}))
            .await;
        assert!(!out.is_error);

        let stored = facts.get_facts(EntityType::User, 42, Some(100)).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, "джаз");
        assert!(stored[0].confidence >= 0.9);
    }

    #[tokio::test]
    async fn rejects_invalid_category() {
        let facts = FactStore::new(Db::open_in_memory().unwrap());
        let tool = RememberTool::new(facts, 100, 42);
        let out = tool
            .execute(json!({"category": "astrology", "key": "sign", "value": "лев"}))
            .await;
        assert!(out.is_error);
    }
}
