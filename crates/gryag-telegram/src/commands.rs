//! Admin and user commands. Each is a thin caller of a core repository
//! operation; anything interesting happens behind the `BotContext`.

use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tracing::info;

use gryag_agent::BotContext;
use gryag_memory::types::{EntityType, PromptScope};

const DONATE_TEXT: &str = "Підтримати хостинг гряга: https://send.monobank.ua/gryag";

/// Handle a slash command. Returns `None` when the text is not a command
/// this adapter knows.
pub async fn handle_command<C: BotContext>(
    ctx: &Arc<C>,
    msg: &Message,
    text: &str,
) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    // Strip a possible @botname suffix from the command itself.
    let command = parts.next()?;
    let command = command.split('@').next().unwrap_or(command);
    let rest: Vec<&str> = parts.collect();

    let chat_id = msg.chat.id.0;
    let caller = msg.from.as_ref().map(|u| u.id.0 as i64)?;
    let is_admin = ctx.is_admin(caller);

    match command {
        "/ban" | "/unban" => {
            if !is_admin {
                return Some("це лише для адмінів".to_string());
            }
            let target = target_user(msg, &rest)?;
            if command == "/ban" {
                ctx.bans().ban(chat_id, target).ok()?;
                info!(chat_id, target, "user banned");
                Some(format!("користувача {target} забанено"))
            } else {
                let removed = ctx.bans().unban(chat_id, target).ok()?;
                Some(if removed {
                    format!("користувача {target} розбанено")
                } else {
                    format!("користувач {target} і не був у бані")
                })
            }
        }
        "/reset" => {
            if !is_admin {
                return Some("це лише для адмінів".to_string());
            }
            let removed = ctx.messages().clear_chat(chat_id).ok()?;
            Some(format!("історію чату очищено ({removed} повідомлень)"))
        }
        "/chatinfo" => {
            if !is_admin {
                return Some("це лише для адмінів".to_string());
            }
            let messages = ctx.messages().count_for_chat(chat_id).unwrap_or(0);
            let chat_facts = ctx
                .facts()
                .get_facts(EntityType::Chat, chat_id, None)
                .map(|f| f.len())
                .unwrap_or(0);
            let used = ctx
                .global_limiter()
                .used_last_hour(caller, Utc::now())
                .unwrap_or(0);
            Some(format!(
                "чат {chat_id}: повідомлень {messages}, фактів про чат {chat_facts}, \
                 твоїх звертань за годину {used}"
            ))
        }
        "/profile" | "/facts" => {
            let facts = ctx
                .facts()
                .get_facts(EntityType::User, caller, Some(chat_id))
                .ok()?;
            if facts.is_empty() {
                return Some("про тебе поки нічого не запам'ятав".to_string());
            }
            let mut out = String::from("що я про тебе знаю:\n");
            for f in facts {
                out.push_str(&format!(
                    "- {}/{}: {} (впевненість {:.2})\n",
                    f.category, f.key, f.value, f.confidence
                ));
            }
            Some(out)
        }
        "/chatfacts" => {
            let facts = ctx.facts().get_facts(EntityType::Chat, chat_id, None).ok()?;
            if facts.is_empty() {
                return Some("про цей чат фактів немає".to_string());
            }
            let mut out = String::from("факти про чат:\n");
            for f in facts {
                out.push_str(&format!("- {}: {}\n", f.key, f.value));
            }
            Some(out)
        }
        "/chatreset" => {
            if !is_admin {
                return Some("це лише для адмінів".to_string());
            }
            let removed = ctx.facts().clear(EntityType::Chat, chat_id).ok()?;
            Some(format!("факти про чат очищено ({removed})"))
        }
        "/prompt" => Some(prompt_command(ctx, chat_id, caller, is_admin, &rest)),
        "/reputation" => {
            if !is_admin {
                return Some("це лише для адмінів".to_string());
            }
            let (Some(user), Some(mult)) = (
                rest.first().and_then(|s| s.parse::<i64>().ok()),
                rest.get(1).and_then(|s| s.parse::<f64>().ok()),
            ) else {
                return Some("вжиток: /reputation <user_id> <0.5..2.0>".to_string());
            };
            ctx.feature_limiter().set_reputation(user, mult).ok()?;
            Some(format!("репутацію {user} встановлено"))
        }
        "/donate" => Some(DONATE_TEXT.to_string()),
        _ => None,
    }
}

fn prompt_command<C: BotContext>(
    ctx: &Arc<C>,
    chat_id: i64,
    caller: i64,
    is_admin: bool,
    rest: &[&str],
) -> String {
    match rest.first().copied() {
        None => match ctx.prompts().resolve(chat_id, Some(caller)) {
            Ok(Some(text)) => format!("активний промпт:\n{text}"),
            _ => "активного промпта немає, працює типова роль".to_string(),
        },
        Some("set") => {
            if !is_admin {
                return "це лише для адмінів".to_string();
            }
            let text = rest[1..].join(" ");
            if text.is_empty() {
                return "вжиток: /prompt set <текст>".to_string();
            }
            match ctx
                .prompts()
                .set_prompt(caller, PromptScope::Chat, Some(chat_id), &text)
            {
                Ok(_) => "промпт чату встановлено".to_string(),
                Err(e) => {
                    tracing::warn!(error = %e, "prompt set failed");
                    "не вдалося зберегти промпт".to_string()
                }
            }
        }
        Some("reset") => {
            if !is_admin {
                return "це лише для адмінів".to_string();
            }
            let active = ctx
                .prompts()
                .list(PromptScope::Chat, Some(chat_id))
                .ok()
                .and_then(|rows| rows.into_iter().find(|p| p.is_active));
            match active {
                Some(prompt) => {
                    let _ = ctx.prompts().deactivate_prompt(prompt.id);
                    "промпт чату скинуто".to_string()
                }
                None => "у цього чату немає власного промпта".to_string(),
            }
        }
        Some("list") => {
            let rows = ctx
                .prompts()
                .list(PromptScope::Chat, Some(chat_id))
                .unwrap_or_default();
            if rows.is_empty() {
                return "промптів для цього чату ще не було".to_string();
            }
            let mut out = String::from("версії промпта чату:\n");
            for p in rows {
                out.push_str(&format!(
                    "- v{} {} {}\n",
                    p.version,
                    if p.is_active { "(активний)" } else { "" },
                    p.created_at.format("%Y-%m-%d")
                ));
            }
            out
        }
        Some(other) => format!("невідома підкоманда: {other}"),
    }
}

/// /ban target: explicit user id argument, or the author of the replied-to
/// message.
fn target_user(msg: &Message, rest: &[&str]) -> Option<i64> {
    if let Some(id) = rest.first().and_then(|s| s.parse::<i64>().ok()) {
        return Some(id);
    }
    msg.reply_to_message()
        .and_then(|r| r.from.as_ref())
        .map(|u| u.id.0 as i64)
}
