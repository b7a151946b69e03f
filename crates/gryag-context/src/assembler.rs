//! Multi-level context manager: five tiers assembled under one token
//! budget. Every tier truncates its own tail, and relevant/episodic
//! snippets already present in the verbatim tiers are skipped.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use gryag_core::config::ContextConfig;
use gryag_core::tokens::estimate_tokens;
use gryag_core::types::Role;
use gryag_llm::LlmClient;
use gryag_memory::episodes::EpisodeStore;
use gryag_memory::facts::FactStore;
use gryag_memory::store::MessageStore;
use gryag_memory::summaries::SummaryStore;
use gryag_memory::types::{EntityType, StoredMessage, SummaryKind};

use crate::search::HybridSearch;

/// Episodes below this importance never enter the episodic tier.
const EPISODIC_MIN_IMPORTANCE: f64 = 0.6;
/// How many episodes the episodic tier considers.
const EPISODIC_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Immediate,
    Recent,
    Relevant,
    Background,
    Episodic,
}

#[derive(Debug, Clone)]
pub struct ContextSnippet {
    pub tier: Tier,
    pub role: Role,
    pub text: String,
    /// Present for snippets that mirror a stored message (dedup key).
    pub message_id: Option<i64>,
}

pub struct ContextAssembler {
    messages: MessageStore,
    facts: FactStore,
    summaries: SummaryStore,
    episodes: EpisodeStore,
    search: HybridSearch,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        messages: MessageStore,
        facts: FactStore,
        summaries: SummaryStore,
        episodes: EpisodeStore,
        llm: Option<Arc<LlmClient>>,
        config: ContextConfig,
    ) -> Self {
        let search = HybridSearch::new(messages.clone(), llm, config.clone());
        Self {
            messages,
            facts,
            summaries,
            episodes,
            search,
            config,
        }
    }

    /// Assemble the ordered snippet list for a turn.
    ///
    /// `exclude_message_id` is the just-persisted current message, which the
    /// orchestrator sends separately as the live user turn.
    pub async fn assemble(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        user_id: Option<i64>,
        user_query: &str,
        exclude_message_id: Option<i64>,
    ) -> Vec<ContextSnippet> {
        let budget = self.config.token_budget;
        let mut out: Vec<ContextSnippet> = Vec::new();
        let mut seen_ids: HashSet<i64> = exclude_message_id.into_iter().collect();

        // Immediate and recent tiers share one store query.
        let recent_rows = self
            .messages
            .recent(chat_id, thread_id, self.config.recent_messages)
            .unwrap_or_default();
        let (immediate, recent): (Vec<_>, Vec<_>) = recent_rows
            .into_iter()
            .filter(|m| !seen_ids.contains(&m.id))
            .enumerate()
            .partition(|(i, _)| *i < self.config.immediate_messages);

        out.extend(self.verbatim_tier(
            Tier::Immediate,
            immediate.into_iter().map(|(_, m)| m),
            share(budget, self.config.immediate_share),
            &mut seen_ids,
        ));
        out.extend(self.verbatim_tier(
            Tier::Recent,
            recent.into_iter().map(|(_, m)| m),
            share(budget, self.config.recent_share),
            &mut seen_ids,
        ));

        out.extend(
            self.relevant_tier(
                chat_id,
                user_query,
                share(budget, self.config.relevant_share),
                &mut seen_ids,
            )
            .await,
        );
        out.extend(self.background_tier(
            chat_id,
            user_id,
            share(budget, self.config.background_share),
        ));
        out.extend(self.episodic_tier(
            chat_id,
            share(budget, self.config.episodic_share),
            &seen_ids,
        ));

        if out.is_empty() {
            // Minimal fallback: the last message only.
            if let Ok(rows) = self.messages.recent(chat_id, thread_id, 1) {
                out.extend(rows.into_iter().map(|m| snippet_from_message(Tier::Immediate, &m)));
            }
        }

        debug!(
            chat_id,
            snippets = out.len(),
            tokens = out.iter().map(|s| estimate_tokens(&s.text)).sum::<usize>(),
            "context assembled"
        );
        out
    }

    /// Budget-take newest-first, then emit chronologically.
    fn verbatim_tier(
        &self,
        tier: Tier,
        rows_newest_first: impl Iterator<Item = StoredMessage>,
        tier_budget: usize,
        seen_ids: &mut HashSet<i64>,
    ) -> Vec<ContextSnippet> {
        let mut used = 0usize;
        let mut picked: Vec<ContextSnippet> = Vec::new();
        for msg in rows_newest_first {
            let snippet = snippet_from_message(tier, &msg);
            let cost = estimate_tokens(&snippet.text);
            if used + cost > tier_budget {
                break;
            }
            used += cost;
            seen_ids.insert(msg.id);
            picked.push(snippet);
        }
        picked.reverse();
        picked
    }

    async fn relevant_tier(
        &self,
        chat_id: i64,
        user_query: &str,
        tier_budget: usize,
        seen_ids: &mut HashSet<i64>,
    ) -> Vec<ContextSnippet> {
        if user_query.trim().is_empty() {
            return Vec::new();
        }
        let hits = self.search.search(chat_id, user_query, 12).await;
        let mut used = 0usize;
        let mut picked: Vec<(i64, ContextSnippet)> = Vec::new();
        for hit in hits {
            if seen_ids.contains(&hit.message_id) {
                continue;
            }
            let snippet = ContextSnippet {
                tier: Tier::Relevant,
                role: hit.role,
                text: hit.content,
                message_id: Some(hit.message_id),
            };
            let cost = estimate_tokens(&snippet.text);
            if used + cost > tier_budget {
                break;
            }
            used += cost;
            seen_ids.insert(hit.message_id);
            picked.push((hit.message_id, snippet));
        }
        // Matches come back ranked; emit them in chronological order.
        picked.sort_by_key(|(id, _)| *id);
        picked.into_iter().map(|(_, s)| s).collect()
    }

    /// Facts about the speaker, active chat facts, and the latest weekly
    /// summary, compressed into bullet lines.
    fn background_tier(
        &self,
        chat_id: i64,
        user_id: Option<i64>,
        tier_budget: usize,
    ) -> Vec<ContextSnippet> {
        let mut lines: Vec<String> = Vec::new();

        if let Some(uid) = user_id {
            if let Ok(facts) = self.facts.get_facts(EntityType::User, uid, Some(chat_id)) {
                for f in facts {
                    lines.push(format!("- user {uid}: {} = {}", f.key, f.value));
                }
            }
        }
        if let Ok(facts) = self.facts.get_facts(EntityType::Chat, chat_id, None) {
            for f in facts {
                lines.push(format!("- чат: {} = {}", f.key, f.value));
            }
        }
        if let Ok(Some(summary)) = self.summaries.latest(chat_id, SummaryKind::Week) {
            lines.push(format!("- тиждень: {}", summary.text));
        }

        if lines.is_empty() {
            return Vec::new();
        }
        let mut text = String::from("Що відомо:\n");
        let mut used = estimate_tokens(&text);
        for line in lines {
            let cost = estimate_tokens(&line);
            if used + cost > tier_budget {
                break;
            }
            used += cost;
            text.push_str(&line);
            text.push('\n');
        }
        vec![ContextSnippet {
            tier: Tier::Background,
            role: Role::System,
            text,
            message_id: None,
        }]
    }

    fn episodic_tier(
        &self,
        chat_id: i64,
        tier_budget: usize,
        seen_ids: &HashSet<i64>,
    ) -> Vec<ContextSnippet> {
        let episodes = self
            .episodes
            .recall(chat_id, EPISODIC_MIN_IMPORTANCE, EPISODIC_LIMIT)
            .unwrap_or_default();
        let mut used = 0usize;
        let mut out = Vec::new();
        for ep in episodes {
            // Skip an episode whose messages are already in the verbatim tiers.
            if ep.message_ids.iter().any(|id| seen_ids.contains(id)) {
                continue;
            }
            let text = format!("Епізод «{}»: {}", ep.topic, ep.summary);
            let cost = estimate_tokens(&text);
            if used + cost > tier_budget {
                break;
            }
            used += cost;
            out.push(ContextSnippet {
                tier: Tier::Episodic,
                role: Role::System,
                text,
                message_id: None,
            });
        }
        out
    }
}

fn share(budget: usize, percent: u8) -> usize {
    budget * percent as usize / 100
}

fn snippet_from_message(tier: Tier, msg: &StoredMessage) -> ContextSnippet {
    let text = match (msg.role, msg.user_id) {
        (Role::User, Some(uid)) => format!("user {uid}: {}", msg.text),
        _ => msg.text.clone(),
    };
    ContextSnippet {
        tier,
        role: msg.role,
        text,
        message_id: Some(msg.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gryag_memory::types::{EmotionalValence, FactCandidate, FactCategory, NewEpisode, NewMessage};
    use gryag_memory::Db;

    struct Fixture {
        assembler: ContextAssembler,
        messages: MessageStore,
        facts: FactStore,
        episodes: EpisodeStore,
    }

    fn fixture(config: ContextConfig) -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let messages = MessageStore::new(db.clone());
        let facts = FactStore::new(db.clone());
        let summaries = SummaryStore::new(db.clone());
        let episodes = EpisodeStore::new(db);
        let assembler = ContextAssembler::new(
            messages.clone(),
            facts.clone(),
            summaries,
            episodes.clone(),
            None,
            config,
        );
        Fixture {
            assembler,
            messages,
            facts,
            episodes,
        }
    }

    fn seed(messages: &MessageStore, chat_id: i64, uid: i64, text: &str) -> i64 {
        messages
            .append(&NewMessage {
                chat_id,
                thread_id: None,
                user_id: Some(uid),
                role: Role::User,
                text: text.into(),
                media_json: None,
                metadata_json: None,
                external_message_id: None,
                reply_to_external_message_id: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_message_lands_in_immediate_tier() {
        let f = fixture(ContextConfig::default());
        seed(&f.messages, 1, 42, "щойно сказане");
        let ctx = f.assembler.assemble(1, None, Some(42), "питання", None).await;
        assert!(ctx
            .iter()
            .any(|s| s.tier == Tier::Immediate && s.text.contains("щойно сказане")));
    }

    #[tokio::test]
    async fn excluded_current_message_is_not_duplicated() {
        let f = fixture(ContextConfig::default());
        let id = seed(&f.messages, 1, 42, "поточне повідомлення");
        let ctx = f
            .assembler
            .assemble(1, None, Some(42), "поточне", Some(id))
            .await;
        assert!(!ctx.iter().any(|s| s.message_id == Some(id)));
    }

    #[tokio::test]
    async fn budget_ceiling_holds() {
        let mut config = ContextConfig::default();
        config.token_budget = 200;
        let f = fixture(config.clone());
        for i in 0..100 {
            seed(&f.messages, 1, 42, &format!("досить довге повідомлення номер {i} з купою слів усередині"));
        }
        let ctx = f.assembler.assemble(1, None, Some(42), "повідомлення", None).await;
        let total: usize = ctx.iter().map(|s| estimate_tokens(&s.text)).sum();
        assert!(
            total as f64 <= config.token_budget as f64 * 1.1,
            "total {total} exceeds ceiling"
        );
    }

    #[tokio::test]
    async fn background_tier_carries_facts() {
        let f = fixture(ContextConfig::default());
        seed(&f.messages, 1, 42, "привіт");
        f.facts
            .upsert(&FactCandidate {
                entity_type: EntityType::User,
                entity_id: 42,
                chat_context: Some(1),
                category: FactCategory::Personal,
                key: "location".into(),
                value: "Kyiv".into(),
                confidence: 0.9,
                evidence_text: None,
                source_message_id: None,
            })
            .unwrap();

        let ctx = f.assembler.assemble(1, None, Some(42), "де я живу?", None).await;
        let background = ctx.iter().find(|s| s.tier == Tier::Background).unwrap();
        assert!(background.text.contains("location = Kyiv"));
    }

    #[tokio::test]
    async fn episodic_tier_lists_topics() {
        let f = fixture(ContextConfig::default());
        seed(&f.messages, 1, 42, "привіт");
        f.episodes
            .insert(&NewEpisode {
                chat_id: 1,
                thread_id: None,
                topic: "похід у Карпати".into(),
                summary: "вирішили йти у серпні".into(),
                summary_embedding: None,
                importance: 0.8,
                emotional_valence: EmotionalValence::Positive,
                message_ids: vec![900],
                participant_ids: vec![42],
                tags: vec![],
            })
            .unwrap();

        let ctx = f.assembler.assemble(1, None, Some(42), "коли похід?", None).await;
        assert!(ctx
            .iter()
            .any(|s| s.tier == Tier::Episodic && s.text.contains("Карпати")));
    }

    #[tokio::test]
    async fn empty_chat_yields_empty_context() {
        let f = fixture(ContextConfig::default());
        let ctx = f.assembler.assemble(1, None, None, "привіт", None).await;
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn tiers_emit_in_order() {
        let f = fixture(ContextConfig::default());
        for i in 0..10 {
            seed(&f.messages, 1, 42, &format!("повідомлення {i}"));
        }
        let ctx = f.assembler.assemble(1, None, Some(42), "повідомлення", None).await;
        let tier_rank = |t: &Tier| match t {
            Tier::Immediate => 0,
            Tier::Recent => 1,
            Tier::Relevant => 2,
            Tier::Background => 3,
            Tier::Episodic => 4,
        };
        let ranks: Vec<_> = ctx.iter().map(|s| tier_rank(&s.tier)).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }
}
