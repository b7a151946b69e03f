//! Extraction orchestrator: rules first, LLM pass only when the rules come
//! up short on a sufficiently active window.

use std::sync::Arc;

use tracing::{debug, warn};

use gryag_core::types::ConversationWindow;
use gryag_llm::LlmClient;
use gryag_memory::facts::FactStore;
use gryag_memory::types::FactCandidate;

use crate::{llm_pass, rules};

/// Run the LLM pass only when the rule pass produced fewer facts than this.
const MIN_RULE_YIELD: usize = 1;
/// ...and the window has at least this many messages.
const MIN_WINDOW_ACTIVITY: usize = 3;

pub struct FactExtractor {
    store: FactStore,
    llm: Option<Arc<LlmClient>>,
}

impl FactExtractor {
    /// `llm` is optional: without it only the rule pass runs.
    pub fn new(store: FactStore, llm: Option<Arc<LlmClient>>) -> Self {
        Self { store, llm }
    }

    /// Extract candidates from the window and fuse them into the store.
    /// Never fails: every error is logged and swallowed.
    pub async fn process(&self, window: &ConversationWindow) -> usize {
        let candidates = self.extract(window).await;
        let mut stored = 0usize;
        for cand in &candidates {
            match self.store.upsert(cand) {
                Ok(_) => stored += 1,
                Err(e) => warn!(error = %e, key = %cand.key, "fact upsert failed"),
            }
        }
        if stored > 0 {
            debug!(stored, chat_id = window.chat_id, "facts extracted");
        }
        stored
    }

    pub async fn extract(&self, window: &ConversationWindow) -> Vec<FactCandidate> {
        let mut candidates = rules::extract(window);

        let llm_warranted =
            candidates.len() < MIN_RULE_YIELD && window.messages.len() >= MIN_WINDOW_ACTIVITY;
        if llm_warranted {
            if let Some(ref llm) = self.llm {
                candidates.extend(llm_pass::extract(llm, window).await);
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gryag_core::types::WindowMessage;
    use gryag_memory::types::{EntityType, FactCategory};
    use gryag_memory::Db;

    fn window_with(texts: &[(&str, i64)]) -> ConversationWindow {
        let mut w = ConversationWindow::new(100, None);
        for (i, (text, uid)) in texts.iter().enumerate() {
            w.push(WindowMessage {
                message_id: i as i64 + 1,
                user_id: Some(*uid),
                user_name: None,
                text: text.to_string(),
                ts: Utc::now(),
            });
        }
        w
    }

    #[tokio::test]
    async fn rule_facts_land_in_the_store() {
        let store = FactStore::new(Db::open_in_memory().unwrap());
        let extractor = FactExtractor::new(store.clone(), None);

        let stored = extractor
            .process(&window_with(&[("@bot привіт, я з Києва", 42)]))
            .await;
        assert_eq!(stored, 1);

        let facts = store.get_facts(EntityType::User, 42, Some(100)).unwrap();
        assert_eq!(facts[0].key, "location");
        assert_eq!(facts[0].value, "Kyiv");
    }

    #[tokio::test]
    async fn repeated_windows_reinforce() {
        let store = FactStore::new(Db::open_in_memory().unwrap());
        let extractor = FactExtractor::new(store.clone(), None);
        let w = window_with(&[("я з Києва", 42)]);

        extractor.process(&w).await;
        extractor.process(&w).await;

        let facts = store.get_facts(EntityType::User, 42, Some(100)).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].evidence_count, 2);
    }

    #[tokio::test]
    async fn no_llm_means_rule_only() {
        let store = FactStore::new(Db::open_in_memory().unwrap());
        let extractor = FactExtractor::new(store, None);
        // Active window, zero rule hits, no LLM configured: nothing extracted.
        let w = window_with(&[("перше", 1), ("друге", 2), ("третє", 3)]);
        assert!(extractor.extract(&w).await.is_empty());
    }

    #[tokio::test]
    async fn preference_scenario() {
        let store = FactStore::new(Db::open_in_memory().unwrap());
        let extractor = FactExtractor::new(store.clone(), None);
        extractor.process(&window_with(&[("люблю пиццу", 43)])).await;

        let facts = store.get_facts(EntityType::User, 43, Some(100)).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, FactCategory::Preference);
        assert_eq!(facts[0].key, "food");
        assert_eq!(facts[0].value, "pizza");
    }
}
