//! Episode monitor: per-(chat, thread) windows, swept on a timer.
//!
//! Messages are enqueued concurrently from turn tasks; the monitor is the
//! single writer that finalizes windows. A window closes on inactivity
//! timeout or size and becomes an episode only when it clears both the
//! message-count and importance bars.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use gryag_core::config::EpisodeConfig;
use gryag_core::types::{ConversationWindow, WindowMessage};
use gryag_llm::LlmClient;
use gryag_memory::episodes::EpisodeStore;
use gryag_memory::types::{EmotionalValence, NewEpisode};

type WindowKey = (i64, Option<i64>);

struct ActiveWindow {
    window: ConversationWindow,
    last_activity: DateTime<Utc>,
}

pub struct EpisodeMonitor {
    windows: DashMap<WindowKey, ActiveWindow>,
    store: EpisodeStore,
    llm: Option<Arc<LlmClient>>,
    config: EpisodeConfig,
}

impl EpisodeMonitor {
    pub fn new(store: EpisodeStore, llm: Option<Arc<LlmClient>>, config: EpisodeConfig) -> Self {
        Self {
            windows: DashMap::new(),
            store,
            llm,
            config,
        }
    }

    /// Append a message to its window. Thread-safe; called from turn tasks.
    pub fn track_message(&self, chat_id: i64, thread_id: Option<i64>, msg: WindowMessage) {
        if !self.config.enabled {
            return;
        }
        let ts = msg.ts;
        let mut entry = self
            .windows
            .entry((chat_id, thread_id))
            .or_insert_with(|| ActiveWindow {
                window: ConversationWindow::new(chat_id, thread_id),
                last_activity: ts,
            });
        entry.window.push(msg);
        entry.last_activity = ts;
    }

    /// Close every window that timed out or overflowed. Returns the number
    /// of episodes created.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let timeout = chrono::Duration::seconds(self.config.window_timeout_seconds as i64);
        let due: Vec<WindowKey> = self
            .windows
            .iter()
            .filter(|entry| {
                now - entry.last_activity > timeout
                    || entry.window.messages.len() >= self.config.window_max_messages
            })
            .map(|entry| *entry.key())
            .collect();

        let mut created = 0usize;
        for key in due {
            let Some((_, active)) = self.windows.remove(&key) else {
                continue;
            };
            match self.finalize(active.window).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, chat_id = key.0, "episode finalization failed"),
            }
        }
        created
    }

    /// Number of currently open windows (resource sampler).
    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    async fn finalize(&self, window: ConversationWindow) -> gryag_memory::Result<bool> {
        if window.messages.len() < self.config.min_messages {
            debug!(
                chat_id = window.chat_id,
                len = window.messages.len(),
                "window discarded: too few messages"
            );
            return Ok(false);
        }
        let importance = score_importance(&window);
        if importance < self.config.min_importance as f64 {
            debug!(chat_id = window.chat_id, importance, "window discarded: unimportant");
            return Ok(false);
        }

        let topic = self.derive_topic(&window).await;
        let summary = self.derive_summary(&window).await;
        let embedding = match self.llm {
            Some(ref llm) => llm.embed(&format!("{topic}\n{summary}")).await.ok(),
            None => None,
        };

        let episode = NewEpisode {
            chat_id: window.chat_id,
            thread_id: window.thread_id,
            topic,
            summary,
            summary_embedding: embedding,
            importance,
            emotional_valence: EmotionalValence::Neutral,
            message_ids: window.messages.iter().map(|m| m.message_id).collect(),
            participant_ids: window.participants.clone(),
            tags: Vec::new(),
        };
        self.store.insert(&episode)?;
        debug!(chat_id = window.chat_id, importance, "episode created");
        Ok(true)
    }

    async fn derive_topic(&self, window: &ConversationWindow) -> String {
        if let Some(ref llm) = self.llm {
            let prompt = format!(
                "Назви тему цієї розмови одним коротким рядком, без лапок:\n{}",
                render_transcript(window, 2000)
            );
            if let Ok(text) = llm.generate_text(None, prompt, Some(0.3)).await {
                let line = text.lines().next().unwrap_or("").trim();
                if !line.is_empty() {
                    return truncate_chars(line, 80);
                }
            }
        }
        fallback_topic(window)
    }

    async fn derive_summary(&self, window: &ConversationWindow) -> String {
        if let Some(ref llm) = self.llm {
            let prompt = format!(
                "Підсумуй цю розмову максимум у 400 символів, збережи рішення:\n{}",
                render_transcript(window, 4000)
            );
            if let Ok(text) = llm.generate_text(None, prompt, Some(0.3)).await {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return truncate_chars(trimmed, 400);
                }
            }
        }
        fallback_summary(window)
    }
}

/// Importance in [0, 1]: a reachable base for any window that survived the
/// message-count bar, plus weights for breadth of participation, volume,
/// questions, and emoji reactions.
pub fn score_importance(window: &ConversationWindow) -> f64 {
    let participants = window.participants.len() as f64;
    let messages = window.messages.len() as f64;
    let has_question = window.messages.iter().any(|m| m.text.contains('?'));
    let has_reaction = window.messages.iter().any(|m| contains_emoji(&m.text));

    let score = 0.3
        + 0.25 * (participants / 2.0).min(1.0)
        + 0.25 * (messages / 10.0).min(1.0)
        + 0.1 * has_question as u8 as f64
        + 0.1 * has_reaction as u8 as f64;
    score.min(1.0)
}

fn contains_emoji(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(u32::from(c),
            0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F000..=0x1F02F)
    })
}

fn fallback_topic(window: &ConversationWindow) -> String {
    window
        .messages
        .iter()
        .find(|m| !m.text.trim().is_empty())
        .map(|m| truncate_chars(m.text.trim(), 80))
        .unwrap_or_else(|| "розмова".to_string())
}

fn fallback_summary(window: &ConversationWindow) -> String {
    let first = window.messages.first().map(|m| m.text.trim()).unwrap_or("");
    let last = window.messages.last().map(|m| m.text.trim()).unwrap_or("");
    truncate_chars(&format!("{first} … {last}"), 400)
}

fn render_transcript(window: &ConversationWindow, max_chars: usize) -> String {
    let mut out = String::new();
    for msg in &window.messages {
        if msg.text.trim().is_empty() {
            continue;
        }
        let who = msg
            .user_id
            .map(|id| format!("user {id}"))
            .unwrap_or_else(|| "хтось".to_string());
        let line = format!("[{who}] {}\n", msg.text.trim());
        if out.len() + line.len() > max_chars {
            break;
        }
        out.push_str(&line);
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
