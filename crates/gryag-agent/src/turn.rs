//! The per-message state machine.
//!
//! ```text
//! handler (filtered) → persist user → [addressed?] → quota → ban →
//!     context → LLM+tools → sanitize → reply
//! post: persist assistant, enqueue embeddings, episode window, facts
//! ```
//!
//! The orchestrator is the only place errors become user-visible text;
//! everything downstream of it either returns a bounded localized message
//! or stays silent.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use gryag_context::Tier;
use gryag_core::texts;
use gryag_core::types::{ConversationWindow, Inbound, MediaPart, Role, WindowMessage};
use gryag_llm::{Part, Turn, TurnRole};
use gryag_memory::types::NewMessage;

use crate::context::BotContext;
use crate::sanitize::sanitize_reply;
use crate::tools::build_registry;

/// Ban notices repeat at most this often.
const BAN_NOTICE_COOLDOWN_MINUTES: i64 = 30;
/// Window size handed to the fact extractor after a turn.
const EXTRACTION_WINDOW: usize = 8;
/// Synthesized query for proactive probes.
const PROACTIVE_QUERY: &str = "про що зараз говорять у чаті";

/// What the adapter should do after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Unaddressed message: recorded, no reply.
    Ignored,
    /// Send this reply.
    Replied(String),
    /// Send this notice (ban/quota) without the usual post-turn work.
    Notice(String),
    /// Say nothing (banned user inside the notice cooldown).
    Silent,
}

/// Run the full pipeline for an already-filtered inbound message.
pub async fn process_turn<C: BotContext + 'static>(
    ctx: &Arc<C>,
    inbound: &Inbound,
    addressed: bool,
) -> TurnOutcome {
    // PERSIST_USER: every observed message lands in memory first.
    let message_id = match persist_inbound(ctx, inbound) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, chat_id = inbound.chat_id, "user message persist failed");
            return TurnOutcome::Ignored;
        }
    };
    track_window(ctx, inbound.chat_id, inbound.thread_id, message_id, inbound);

    if !addressed {
        return TurnOutcome::Ignored;
    }
    let Some(user_id) = inbound.user_id else {
        return TurnOutcome::Ignored;
    };

    // Serialize turns per (chat, user) so history stays consistent.
    let _turn_guard = ctx.turn_locks().acquire(inbound.chat_id, user_id).await;

    // QUOTA_OK.
    if !ctx.is_admin(user_id) {
        match ctx.global_limiter().allow(user_id) {
            Ok(true) => {}
            Ok(false) => return TurnOutcome::Notice(texts::quota_snark().to_string()),
            Err(e) => {
                warn!(error = %e, user_id, "quota check failed");
            }
        }
    }

    // BAN_OK: silent except one notice per cooldown.
    if !ctx.is_admin(user_id) {
        match ctx.bans().notice_due(
            inbound.chat_id,
            user_id,
            Duration::minutes(BAN_NOTICE_COOLDOWN_MINUTES),
            Utc::now(),
        ) {
            Ok(true) => return TurnOutcome::Notice(texts::BANNED.to_string()),
            Ok(false) => {
                if ctx.bans().is_banned(inbound.chat_id, user_id).unwrap_or(false) {
                    return TurnOutcome::Silent;
                }
            }
            Err(e) => warn!(error = %e, user_id, "ban check failed"),
        }
    }

    // CONTEXT → LLM → SANITIZE.
    let reply = generate_reply(ctx, inbound, user_id, message_id).await;
    match reply {
        Some(text) if !text.is_empty() => TurnOutcome::Replied(text),
        _ => TurnOutcome::Replied(texts::LLM_UNAVAILABLE.to_string()),
    }
}

/// Post-send bookkeeping: persist the assistant turn, enqueue its
/// embedding, extend the episode window, schedule fact extraction.
pub fn finish_turn<C: BotContext + 'static>(ctx: &Arc<C>, inbound: &Inbound, reply: &str) {
    let assistant = NewMessage {
        chat_id: inbound.chat_id,
        thread_id: inbound.thread_id,
        user_id: None,
        role: Role::Assistant,
        text: reply.to_string(),
        media_json: None,
        metadata_json: None,
        external_message_id: None,
        reply_to_external_message_id: Some(inbound.message_id),
    };
    match ctx.messages().append(&assistant) {
        Ok(id) => {
            spawn_embedding(ctx, id, reply.to_string());
            ctx.episode_monitor().track_message(
                inbound.chat_id,
                inbound.thread_id,
                WindowMessage {
                    message_id: id,
                    user_id: None,
                    user_name: None,
                    text: reply.to_string(),
                    ts: Utc::now(),
                },
            );
        }
        Err(e) => warn!(error = %e, "assistant message persist failed"),
    }

    spawn_fact_extraction(ctx, inbound.chat_id, inbound.thread_id);
}

/// Scheduler-driven proactive probe: same pipeline, synthesized trigger,
/// no quota (the scheduler caps frequency per chat).
pub async fn proactive_reply<C: BotContext + 'static>(ctx: &Arc<C>, chat_id: i64) -> Option<String> {
    let snippets = ctx
        .assembler()
        .assemble(chat_id, None, None, PROACTIVE_QUERY, None)
        .await;
    if snippets.iter().all(|s| s.tier != Tier::Immediate) {
        // Nothing fresh to react to.
        return None;
    }
    let (system, history) = split_prompt(ctx, chat_id, None, snippets);
    let prompt = "Встав доречну коротку репліку в розмову вище. Якщо додати \
                  нічого, відповідай порожнім рядком."
        .to_string();

    match ctx
        .llm()
        .generate(Some(system), history, vec![Part::Text(prompt)], &[], None)
        .await
    {
        Ok(text) => {
            let clean = sanitize_reply(&text);
            (!clean.is_empty()).then(|| {
                info!(chat_id, "proactive reply generated");
                clean
            })
        }
        Err(e) => {
            debug!(error = %e, chat_id, "proactive generation failed");
            None
        }
    }
}

async fn generate_reply<C: BotContext + 'static>(
    ctx: &Arc<C>,
    inbound: &Inbound,
    user_id: i64,
    message_id: i64,
) -> Option<String> {
    let snippets = ctx
        .assembler()
        .assemble(
            inbound.chat_id,
            inbound.thread_id,
            Some(user_id),
            &inbound.text,
            Some(message_id),
        )
        .await;
    let (system, history) = split_prompt(ctx, inbound.chat_id, Some(user_id), snippets);

    let registry = build_registry(ctx, inbound.chat_id, user_id);
    let definitions = registry.definitions();

    let mut user_parts: Vec<Part> = Vec::new();
    if !inbound.text.trim().is_empty() {
        user_parts.push(Part::Text(format!("user {user_id}: {}", inbound.text)));
    }
    user_parts.extend(inbound.media.iter().filter_map(media_to_part));
    if user_parts.is_empty() {
        user_parts.push(Part::Text(format!("user {user_id}: [медіа]")));
    }

    match ctx
        .llm()
        .generate(
            Some(system),
            history,
            user_parts,
            &definitions,
            Some(&registry),
        )
        .await
    {
        Ok(text) => Some(sanitize_reply(&text)),
        Err(e) => {
            warn!(error = %e, chat_id = inbound.chat_id, "LLM turn failed");
            None
        }
    }
}

/// Fold the tiers into an LLM request: background and episodic snippets
/// join the system instruction; the verbatim tiers become history turns,
/// oldest context first, immediate closest to the live message.
fn split_prompt<C: BotContext>(
    ctx: &Arc<C>,
    chat_id: i64,
    user_id: Option<i64>,
    snippets: Vec<gryag_context::ContextSnippet>,
) -> (String, Vec<Turn>) {
    let persona = ctx
        .prompts()
        .resolve(chat_id, user_id)
        .ok()
        .flatten()
        .unwrap_or_else(|| texts::DEFAULT_PERSONA.to_string());

    let mut system = persona;
    let mut relevant: Vec<Turn> = Vec::new();
    let mut recent: Vec<Turn> = Vec::new();
    let mut immediate: Vec<Turn> = Vec::new();

    for snippet in snippets {
        match snippet.tier {
            Tier::Background | Tier::Episodic => {
                system.push_str("\n\n");
                system.push_str(&snippet.text);
            }
            tier => {
                let role = match snippet.role {
                    Role::Assistant => TurnRole::Model,
                    _ => TurnRole::User,
                };
                let turn = Turn {
                    role,
                    parts: vec![Part::Text(snippet.text)],
                };
                match tier {
                    Tier::Immediate => immediate.push(turn),
                    Tier::Recent => recent.push(turn),
                    _ => relevant.push(turn),
                }
            }
        }
    }

    let mut history = relevant;
    history.extend(recent);
    history.extend(immediate);
    (system, history)
}

fn persist_inbound<C: BotContext + 'static>(ctx: &Arc<C>, inbound: &Inbound) -> gryag_memory::Result<i64> {
    let media_json = (!inbound.media.is_empty())
        .then(|| serde_json::to_string(&inbound.media).ok())
        .flatten();
    let metadata_json = inbound
        .user_name
        .as_ref()
        .map(|name| serde_json::json!({"user_name": name}).to_string());

    let id = ctx.messages().append(&NewMessage {
        chat_id: inbound.chat_id,
        thread_id: inbound.thread_id,
        user_id: inbound.user_id,
        role: Role::User,
        text: inbound.text.clone(),
        media_json,
        metadata_json,
        external_message_id: Some(inbound.message_id),
        reply_to_external_message_id: inbound.reply_to,
    })?;

    if !inbound.text.trim().is_empty() {
        spawn_embedding(ctx, id, inbound.text.clone());
    }

    // Register media in the TTL cache so the image tools can re-fetch it.
    for media in &inbound.media {
        let entry = gryag_memory::types::MediaCacheEntry {
            media_id: media.file_id.clone(),
            chat_id: inbound.chat_id,
            user_id: inbound.user_id,
            file_path: media.file_id.clone(),
            media_type: media.mime.clone(),
            expires_at: Utc::now() + Duration::hours(1),
            created_at: Utc::now(),
        };
        if let Err(e) = ctx.media().put(&entry) {
            debug!(error = %e, "media cache write failed");
        }
    }
    Ok(id)
}

/// Fire-and-forget embedding backfill; the semaphore in the client bounds
/// how many run at once.
fn spawn_embedding<C: BotContext + 'static>(ctx: &Arc<C>, message_id: i64, text: String) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        match ctx.llm().embed(&text).await {
            Ok(vec) => {
                if let Err(e) = ctx.messages().update_embedding(message_id, &vec) {
                    debug!(error = %e, message_id, "embedding write failed");
                }
            }
            Err(e) => debug!(error = %e, message_id, "embedding failed"),
        }
    });
}

fn track_window<C: BotContext>(
    ctx: &Arc<C>,
    chat_id: i64,
    thread_id: Option<i64>,
    message_id: i64,
    inbound: &Inbound,
) {
    ctx.episode_monitor().track_message(
        chat_id,
        thread_id,
        WindowMessage {
            message_id,
            user_id: inbound.user_id,
            user_name: inbound.user_name.clone(),
            text: inbound.text.clone(),
            ts: inbound.ts,
        },
    );
}

/// Build a window from the last few stored messages and hand it to the
/// extractor off-turn.
fn spawn_fact_extraction<C: BotContext + 'static>(
    ctx: &Arc<C>,
    chat_id: i64,
    thread_id: Option<i64>,
) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let rows = match ctx.messages().recent(chat_id, thread_id, EXTRACTION_WINDOW) {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, chat_id, "extraction window load failed");
                return;
            }
        };
        let mut window = ConversationWindow::new(chat_id, thread_id);
        for msg in rows.into_iter().rev() {
            if msg.role != Role::User {
                continue;
            }
            window.push(WindowMessage {
                message_id: msg.id,
                user_id: msg.user_id,
                user_name: None,
                text: msg.text,
                ts: msg.created_at,
            });
        }
        if window.messages.is_empty() {
            return;
        }
        ctx.fact_extractor().process(&window).await;
    });
}

fn media_to_part(media: &MediaPart) -> Option<Part> {
    media.data.as_ref().map(|data| Part::InlineData {
        kind: media.kind,
        mime: media.mime.clone(),
        data_b64: data.clone(),
    })
}
