//! Periodic per-chat rollups: 7-day and 30-day summaries, generated daily
//! at a configured local hour. Re-running a window overwrites the same row.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, warn};

use gryag_core::config::SummarizerConfig;
use gryag_core::tokens::estimate_tokens;
use gryag_llm::LlmClient;
use gryag_memory::store::MessageStore;
use gryag_memory::summaries::SummaryStore;
use gryag_memory::types::SummaryKind;

const META_PROMPT: &str = "Підсумуй розмову стисло. Збережи ухвалені рішення, \
домовленості та важливий контекст. Пиши однією мовою — тією, якою ведеться чат.";
const SUMMARY_TEMPERATURE: f32 = 0.2;

pub struct ChatSummarizer {
    messages: MessageStore,
    summaries: SummaryStore,
    llm: Arc<LlmClient>,
    config: SummarizerConfig,
    /// Per-kind date of the last completed run.
    last_run: Mutex<HashMap<&'static str, chrono::NaiveDate>>,
}

impl ChatSummarizer {
    pub fn new(
        messages: MessageStore,
        summaries: SummaryStore,
        llm: Arc<LlmClient>,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            messages,
            summaries,
            llm,
            config,
            last_run: Mutex::new(HashMap::new()),
        }
    }

    /// Run rollups if the configured hour has arrived and today's run has
    /// not happened yet. Returns the number of summaries written.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        if !self.config.enabled || now.hour() != self.config.hour as u32 {
            return 0;
        }
        let mut written = 0usize;
        for kind in [SummaryKind::Week, SummaryKind::Month] {
            if self.already_ran_today(kind, now) {
                continue;
            }
            written += self.run_kind(kind, now).await;
            self.last_run
                .lock()
                .unwrap()
                .insert(kind.as_str(), now.date_naive());
        }
        written
    }

    /// Force one kind for one chat (admin /chatinfo refresh path).
    pub async fn summarize_chat(
        &self,
        chat_id: i64,
        kind: SummaryKind,
        now: DateTime<Utc>,
    ) -> bool {
        let (start, end) = period_bounds(kind, now);
        let log = match self.messages.chat_log(chat_id, start, end, self.config.max_chars) {
            Ok(log) if !log.is_empty() => log,
            Ok(_) => return false,
            Err(e) => {
                warn!(error = %e, chat_id, "summary log build failed");
                return false;
            }
        };

        let prompt = format!("{META_PROMPT}\n\nЧат:\n{log}");
        let text = match self
            .llm
            .generate_text(None, prompt, Some(SUMMARY_TEMPERATURE))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, chat_id, kind = kind.as_str(), "summarization failed");
                return false;
            }
        };

        let tokens = estimate_tokens(&text);
        if let Err(e) = self
            .summaries
            .upsert(chat_id, kind, start, end, &text, tokens)
        {
            warn!(error = %e, chat_id, "summary store write failed");
            return false;
        }
        debug!(chat_id, kind = kind.as_str(), tokens, "chat summary written");
        true
    }

    async fn run_kind(&self, kind: SummaryKind, now: DateTime<Utc>) -> usize {
        let (start, _) = period_bounds(kind, now);
        let chats = match self.messages.active_chats(start) {
            Ok(chats) => chats,
            Err(e) => {
                warn!(error = %e, "active chat listing failed");
                return 0;
            }
        };

        let mut written = 0usize;
        for chat_id in chats.into_iter().take(self.config.daily_cap) {
            if self.summarize_chat(chat_id, kind, now).await {
                written += 1;
            }
        }
        written
    }

    fn already_ran_today(&self, kind: SummaryKind, now: DateTime<Utc>) -> bool {
        self.last_run
            .lock()
            .unwrap()
            .get(kind.as_str())
            .is_some_and(|date| *date == now.date_naive())
    }
}

/// Day-aligned period: end at today 00:00 UTC, start `kind.days()` earlier.
/// Day alignment keeps `period_start` stable across re-runs within a day so
/// the unique key overwrites instead of piling up rows.
fn period_bounds(kind: SummaryKind, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let start = end - chrono::Duration::days(kind.days());
    (start, end)
}
