//! Long-polling adapter: wires the handler into a teloxide Dispatcher and
//! runs the proactive delivery task beside it.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::BotCommand;
use tokio::sync::mpsc;
use tracing::{info, warn};

use gryag_agent::{BotContext, TriggerMatcher};
use gryag_scheduler::ProactiveOutbound;

use crate::handler::handle_message;
use crate::send;
use crate::BotIdentity;

pub struct TelegramAdapter<C: BotContext + 'static> {
    ctx: Arc<C>,
}

impl<C: BotContext + 'static> TelegramAdapter<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }

    /// Connect and drive the long-polling loop until the process exits.
    ///
    /// When `proactive_rx` is set, a delivery task forwards scheduler-made
    /// replies into their chats.
    pub async fn run(self, proactive_rx: Option<mpsc::Receiver<ProactiveOutbound>>) {
        let bot = Bot::new(&self.ctx.config().telegram.token);

        let identity = match bot.get_me().await {
            Ok(me) => Arc::new(BotIdentity {
                id: me.user.id.0,
                username: me.user.username.clone().unwrap_or_default(),
            }),
            Err(e) => {
                warn!(error = %e, "get_me failed, mention detection degraded");
                Arc::new(BotIdentity {
                    id: 0,
                    username: String::new(),
                })
            }
        };

        if let Err(e) = bot.set_my_commands(command_list()).await {
            warn!(error = %e, "set_my_commands failed");
        }

        if let Some(rx) = proactive_rx {
            tokio::spawn(run_proactive_delivery(bot.clone(), rx));
        }

        let matcher = Arc::new(TriggerMatcher::new(
            &self.ctx.config().telegram.trigger_patterns,
        ));

        info!(bot = %identity.username, "telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message::<C>);
        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.ctx, matcher, identity])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}

fn command_list() -> Vec<BotCommand> {
    vec![
        BotCommand::new("profile", "що бот про тебе знає"),
        BotCommand::new("chatfacts", "факти про цей чат"),
        BotCommand::new("prompt", "показати чи налаштувати промпт"),
        BotCommand::new("donate", "підтримати хостинг"),
    ]
}

/// Deliver proactive replies produced by the scheduler.
async fn run_proactive_delivery(bot: Bot, mut rx: mpsc::Receiver<ProactiveOutbound>) {
    while let Some(outbound) = rx.recv().await {
        send::send_reply(&bot, ChatId(outbound.chat_id), None, &outbound.text).await;
    }
    info!("proactive delivery task exiting (channel closed)");
}
