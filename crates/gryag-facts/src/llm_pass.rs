//! Guarded LLM extraction pass.
//!
//! The model sees a transcript annotated with user ids and must answer with
//! a bare JSON array of fact objects. Anything that does not parse, names an
//! unknown user, or falls outside the category enumeration is dropped.

use serde::Deserialize;
use tracing::debug;

use gryag_core::types::ConversationWindow;
use gryag_llm::LlmClient;
use gryag_memory::types::{EntityType, FactCandidate, FactCategory};

const EXTRACTION_PROMPT: &str = "\
Ти витягуєш довготривалі факти про учасників чату з фрагмента розмови.\n\
Поверни ЛИШЕ JSON-масив без пояснень. Кожен елемент:\n\
{\"user_id\": число, \"category\": одна з [personal, preference, profession, interest, opinion, relationship],\n\
 \"key\": короткий ключ, \"value\": значення, \"confidence\": 0..1, \"evidence\": цитата}\n\
Якщо фактів немає, поверни [].";

#[derive(Debug, Deserialize)]
struct RawFact {
    user_id: i64,
    category: String,
    key: String,
    value: String,
    confidence: f64,
    #[serde(default)]
    evidence: Option<String>,
}

/// Ask the model for facts in the window. Returns an empty list on any
/// model or parse failure.
pub async fn extract(llm: &LlmClient, window: &ConversationWindow) -> Vec<FactCandidate> {
    let transcript = render_transcript(window);
    if transcript.is_empty() {
        return Vec::new();
    }

    let prompt = format!("{EXTRACTION_PROMPT}\n\nРозмова:\n{transcript}");
    let text = match llm.generate_text(None, prompt, Some(0.1)).await {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "LLM fact pass failed");
            return Vec::new();
        }
    };

    parse_facts(&text, window)
}

/// Parse the model's reply, tolerating surrounding prose or code fences.
pub fn parse_facts(text: &str, window: &ConversationWindow) -> Vec<FactCandidate> {
    let json = match extract_json_array(text) {
        Some(json) => json,
        None => return Vec::new(),
    };
    let raw: Vec<RawFact> = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "fact JSON did not parse");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|f| {
            let category: FactCategory = f.category.parse().ok()?;
            if !window.participants.contains(&f.user_id) {
                return None;
            }
            if f.key.trim().is_empty() || f.value.trim().is_empty() {
                return None;
            }
            Some(FactCandidate {
                entity_type: EntityType::User,
                entity_id: f.user_id,
                chat_context: Some(window.chat_id),
                category,
                key: f.key.trim().to_lowercase(),
                value: f.value.trim().to_string(),
                confidence: f.confidence.clamp(0.0, 1.0),
                evidence_text: f.evidence,
                source_message_id: None,
            })
        })
        .collect()
}

fn render_transcript(window: &ConversationWindow) -> String {
    window
        .messages
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .filter_map(|m| {
            m.user_id
                .map(|uid| format!("[user {uid}] {}", m.text.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find the outermost JSON array in the reply.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gryag_core::types::WindowMessage;

    fn window() -> ConversationWindow {
        let mut w = ConversationWindow::new(100, None);
        w.push(WindowMessage {
            message_id: 1,
            user_id: Some(42),
            user_name: None,
            text: "граю на бандурі десять років".into(),
            ts: Utc::now(),
        });
        w
    }

    #[test]
    fn parses_a_clean_array() {
        let reply = r#"[{"user_id": 42, "category": "interest", "key": "hobby", "value": "бандура", "confidence": 0.7, "evidence": "граю на бандурі"}]"#;
        let facts = parse_facts(reply, &window());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, FactCategory::Interest);
        assert_eq!(facts[0].entity_id, 42);
    }

    #[test]
    fn tolerates_code_fences() {
        let reply = "```json\n[{\"user_id\": 42, \"category\": \"interest\", \"key\": \"hobby\", \"value\": \"бандура\", \"confidence\": 0.7}]\n```";
        assert_eq!(parse_facts(reply, &window()).len(), 1);
    }

    #[test]
    fn drops_unknown_category() {
        let reply = r#"[{"user_id": 42, "category": "astrology", "key": "sign", "value": "лев", "confidence": 0.9}]"#;
        assert!(parse_facts(reply, &window()).is_empty());
    }

    #[test]
    fn drops_unknown_participant() {
        let reply = r#"[{"user_id": 999, "category": "interest", "key": "hobby", "value": "бандура", "confidence": 0.7}]"#;
        assert!(parse_facts(reply, &window()).is_empty());
    }

    #[test]
    fn clamps_confidence() {
        let reply = r#"[{"user_id": 42, "category": "interest", "key": "hobby", "value": "бандура", "confidence": 3.0}]"#;
        let facts = parse_facts(reply, &window());
        assert!((facts[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_facts("ніяких фактів", &window()).is_empty());
        assert!(parse_facts("[not json]", &window()).is_empty());
    }
}
