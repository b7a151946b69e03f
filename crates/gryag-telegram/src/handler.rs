//! The message handler registered in the teloxide Dispatcher.
//!
//! Runs for every incoming `Message`:
//! 1. bot-sender filter
//! 2. allowed/blocked chat filter
//! 3. command interception
//! 4. normalization (media download included)
//! 5. addressed classification
//! 6. non-blocking turn execution and reply delivery

use std::sync::Arc;

use teloxide::prelude::*;

use gryag_agent::{turn, BotContext, TriggerMatcher, TurnOutcome};

use crate::commands;
use crate::ingest;
use crate::send;
use crate::typing::TypingHandle;
use crate::BotIdentity;

pub async fn handle_message<C: BotContext + 'static>(
    bot: Bot,
    msg: Message,
    ctx: Arc<C>,
    matcher: Arc<TriggerMatcher>,
    identity: Arc<BotIdentity>,
) -> ResponseResult<()> {
    // Ignore other bots (and our own echoes).
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(true) {
        return Ok(());
    }

    // Ingress chat filter.
    let telegram_cfg = &ctx.config().telegram;
    let chat_id = msg.chat.id.0;
    if telegram_cfg.blocked_chat_ids.contains(&chat_id) {
        return Ok(());
    }
    if !telegram_cfg.allowed_chat_ids.is_empty()
        && !telegram_cfg.allowed_chat_ids.contains(&chat_id)
    {
        return Ok(());
    }

    // Commands never enter the turn pipeline.
    let text = msg.text().or(msg.caption()).unwrap_or("");
    if text.starts_with('/') {
        if let Some(response) = commands::handle_command(&ctx, &msg, text).await {
            send::send_reply(&bot, msg.chat.id, Some(msg.id.0 as i64), &response).await;
        }
        return Ok(());
    }

    let inbound = ingest::normalize(&bot, &msg, identity.id).await;
    if inbound.is_empty() {
        return Ok(());
    }
    let addressed = matcher.is_addressed(&inbound, Some(&identity.username));

    // Run the turn off the dispatcher so long LLM calls never block polling.
    let chat = msg.chat.id;
    tokio::spawn(async move {
        let typing = addressed.then(|| TypingHandle::start(bot.clone(), chat));

        let outcome = turn::process_turn(&ctx, &inbound, addressed).await;

        if let Some(typing) = typing {
            typing.stop();
        }

        match outcome {
            TurnOutcome::Replied(reply) => {
                send::send_reply(&bot, chat, Some(inbound.message_id), &reply).await;
                turn::finish_turn(&ctx, &inbound, &reply);
            }
            TurnOutcome::Notice(notice) => {
                send::send_reply(&bot, chat, Some(inbound.message_id), &notice).await;
            }
            TurnOutcome::Ignored | TurnOutcome::Silent => {}
        }
    });

    Ok(())
}
