//! Hybrid message retrieval: full-text candidates first, then semantic
//! candidates over recent embeddings, both discounted by recency. Stateless;
//! every query goes back to the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use gryag_core::config::ContextConfig;
use gryag_core::types::Role;
use gryag_llm::LlmClient;
use gryag_memory::embedding::cosine;
use gryag_memory::store::MessageStore;
use gryag_memory::types::StoredMessage;

/// Semantic candidates below this cosine similarity are ignored.
const MIN_SEMANTIC_SIMILARITY: f32 = 0.3;
/// How many embedded rows are scanned per `k` requested results.
const SEMANTIC_SCAN_FACTOR: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message_id: i64,
    pub role: Role,
    pub content: String,
    pub score: f32,
}

pub struct HybridSearch {
    messages: MessageStore,
    llm: Option<Arc<LlmClient>>,
    config: ContextConfig,
}

impl HybridSearch {
    pub fn new(messages: MessageStore, llm: Option<Arc<LlmClient>>, config: ContextConfig) -> Self {
        Self {
            messages,
            llm,
            config,
        }
    }

    /// Ranked prior messages for `query`. Never fails: retrieval errors
    /// degrade to the last-`k` fallback.
    pub async fn search(&self, chat_id: i64, query: &str, k: usize) -> Vec<SearchHit> {
        let now = Utc::now();
        let mut hits: Vec<SearchHit> = Vec::new();

        if self.config.enable_keyword_search {
            match self.messages.keyword_candidates(chat_id, query, k) {
                Ok(rows) => {
                    hits.extend(rows.into_iter().map(|m| {
                        let score = self.config.keyword_weight * self.recency(&m, now);
                        to_hit(m, score)
                    }));
                }
                Err(e) => debug!(error = %e, "keyword search failed"),
            }
        }

        if self.config.enable_hybrid_search {
            let semantic = self.semantic_candidates(chat_id, query, k, now).await;
            for hit in semantic {
                if !hits.iter().any(|h| h.message_id == hit.message_id) {
                    hits.push(hit);
                }
            }
        }

        hits.truncate(k);
        if hits.is_empty() {
            // Nothing matched: fall back to the last k messages verbatim.
            if let Ok(rows) = self.messages.recent(chat_id, None, k) {
                hits = rows.into_iter().map(|m| to_hit(m, 0.0)).collect();
                hits.reverse();
            }
        }
        hits
    }

    async fn semantic_candidates(
        &self,
        chat_id: i64,
        query: &str,
        k: usize,
        now: DateTime<Utc>,
    ) -> Vec<SearchHit> {
        let Some(ref llm) = self.llm else {
            return Vec::new();
        };
        let query_vec = match llm.embed(query).await {
            Ok(vec) => vec,
            Err(e) => {
                debug!(error = %e, "query embedding failed, keyword-only retrieval");
                return Vec::new();
            }
        };

        let rows = match self
            .messages
            .recent_embedded(chat_id, k * SEMANTIC_SCAN_FACTOR)
        {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, "embedded row scan failed");
                return Vec::new();
            }
        };

        let mut scored: Vec<(f32, SearchHit)> = rows
            .into_iter()
            .filter_map(|(msg, vec)| {
                let similarity = cosine(&query_vec, &vec);
                if similarity < MIN_SEMANTIC_SIMILARITY {
                    return None;
                }
                let recency = self.recency(&msg, now);
                let score =
                    self.config.semantic_weight * (0.5 * similarity + 0.5 * recency);
                Some((similarity, to_hit(msg, score)))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, hit)| hit).take(k).collect()
    }

    /// Recency decay: `1 / (1 + age_days / 7)`, disabled flat at 1.0.
    fn recency(&self, msg: &StoredMessage, now: DateTime<Utc>) -> f32 {
        if !self.config.enable_temporal_boosting {
            return 1.0;
        }
        let age_days = (now - msg.created_at).num_seconds().max(0) as f32 / 86_400.0;
        self.config.temporal_weight / (1.0 + age_days / 7.0)
    }
}

fn to_hit(msg: StoredMessage, score: f32) -> SearchHit {
    SearchHit {
        message_id: msg.id,
        role: msg.role,
        content: msg.text,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gryag_llm::{GenerateRequest, GenerateResponse, LlmProvider};
    use gryag_memory::types::NewMessage;
    use gryag_memory::Db;

    /// Embeds "борщ"-flavoured text near one corner of the space and
    /// everything else near the other.
    struct ToyEmbedder;

    #[async_trait]
    impl LlmProvider for ToyEmbedder {
        fn name(&self) -> &str {
            "toy"
        }
        async fn generate(&self, _req: &GenerateRequest) -> gryag_llm::Result<GenerateResponse> {
            Ok(GenerateResponse::default())
        }
        async fn embed(&self, text: &str) -> gryag_llm::Result<Vec<f32>> {
            if text.contains("борщ") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
        async fn generate_grounded(&self, _q: &str) -> gryag_llm::Result<String> {
            Ok(String::new())
        }
    }

    fn setup() -> (HybridSearch, MessageStore) {
        let db = Db::open_in_memory().unwrap();
        let messages = MessageStore::new(db);
        let llm = Arc::new(LlmClient::new(
            Arc::new(ToyEmbedder),
            "gemini-2.5-flash",
            std::time::Duration::from_secs(5),
        ));
        let search = HybridSearch::new(messages.clone(), Some(llm), ContextConfig::default());
        (search, messages)
    }

    fn seed(messages: &MessageStore, chat_id: i64, text: &str, embed: Option<&[f32]>) -> i64 {
        let id = messages
            .append(&NewMessage {
                chat_id,
                thread_id: None,
                user_id: Some(1),
                role: Role::User,
                text: text.into(),
                media_json: None,
                metadata_json: None,
                external_message_id: None,
                reply_to_external_message_id: None,
            })
            .unwrap();
        if let Some(vec) = embed {
            messages.update_embedding(id, vec).unwrap();
        }
        id
    }

    #[tokio::test]
    async fn keyword_hits_come_first() {
        let (search, messages) = setup();
        seed(&messages, 1, "вчора варили борщ", Some(&[1.0, 0.0]));
        seed(&messages, 1, "котики це добре", Some(&[0.0, 1.0]));

        let hits = search.search(1, "борщ", 5).await;
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("борщ"));
    }

    #[tokio::test]
    async fn semantic_results_are_deduplicated_against_keyword() {
        let (search, messages) = setup();
        let id = seed(&messages, 1, "вчора варили борщ", Some(&[1.0, 0.0]));

        let hits = search.search(1, "борщ", 5).await;
        let matching: Vec<_> = hits.iter().filter(|h| h.message_id == id).collect();
        assert_eq!(matching.len(), 1);
    }

    #[tokio::test]
    async fn semantic_finds_conceptual_matches() {
        let (search, messages) = setup();
        // No keyword overlap with the query text, but the toy embedder puts
        // them in the same corner.
        let id = seed(&messages, 1, "рецепт борщу від бабусі", Some(&[0.9, 0.1]));
        seed(&messages, 1, "погода сьогодні", Some(&[0.0, 1.0]));

        let hits = search.search(1, "борщ смачний", 5).await;
        assert!(hits.iter().any(|h| h.message_id == id));
    }

    #[tokio::test]
    async fn empty_results_fall_back_to_recent() {
        let (search, messages) = setup();
        seed(&messages, 1, "перше", None);
        seed(&messages, 1, "друге", None);

        let hits = search.search(1, "xyzzy", 5).await;
        assert_eq!(hits.len(), 2);
        // Fallback is verbatim recent history, oldest first.
        assert_eq!(hits[0].content, "перше");
    }

    #[tokio::test]
    async fn truncates_to_k() {
        let (search, messages) = setup();
        for i in 0..10 {
            seed(&messages, 1, &format!("борщ номер {i}"), None);
        }
        let hits = search.search(1, "борщ", 3).await;
        assert_eq!(hits.len(), 3);
    }
}
