//! Cooperative background loops: episode sweep, retention pruning, daily
//! summaries, the optional proactive responder, and the resource sampler.
//! One select loop, one watch-channel shutdown signal observed at the top
//! of every tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use gryag_agent::{turn, BotContext};
use gryag_core::types::Role;
use gryag_episodes::ChatSummarizer;
use gryag_limits::{Gate, InProcessGate};
use gryag_memory::types::NewMessage;

/// Cadence of the summarizer hour check.
const SUMMARIZER_CHECK_SECS: u64 = 300;
/// Cadence of the resource sampler.
const SAMPLER_SECS: u64 = 600;
/// At most this many chats probed per proactive tick.
const PROACTIVE_CHATS_PER_TICK: usize = 3;

/// A proactive message awaiting delivery by the channel adapter.
#[derive(Debug, Clone)]
pub struct ProactiveOutbound {
    pub chat_id: i64,
    pub text: String,
}

pub struct Scheduler<C: BotContext + 'static> {
    ctx: Arc<C>,
    summarizer: Arc<ChatSummarizer>,
    proactive_tx: Option<mpsc::Sender<ProactiveOutbound>>,
    proactive_gate: InProcessGate,
}

impl<C: BotContext + 'static> Scheduler<C> {
    pub fn new(
        ctx: Arc<C>,
        summarizer: Arc<ChatSummarizer>,
        proactive_tx: Option<mpsc::Sender<ProactiveOutbound>>,
    ) -> Self {
        Self {
            ctx,
            summarizer,
            proactive_tx,
            proactive_gate: InProcessGate::new(),
        }
    }

    /// Drive all loops until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let cfg = self.ctx.config().clone();
        let mut sweep = tokio::time::interval(Duration::from_secs(
            cfg.episodes.sweep_interval_seconds.max(1),
        ));
        let mut prune = tokio::time::interval(Duration::from_secs(
            cfg.retention.prune_interval_seconds.max(60),
        ));
        let mut summarize =
            tokio::time::interval(Duration::from_secs(SUMMARIZER_CHECK_SECS));
        let mut proactive = tokio::time::interval(Duration::from_secs(
            cfg.proactive.interval_seconds.max(60),
        ));
        let mut sample = tokio::time::interval(Duration::from_secs(SAMPLER_SECS));

        info!("scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let created = self.ctx.episode_monitor().sweep(Utc::now()).await;
                    if created > 0 {
                        debug!(created, "episode sweep");
                    }
                }
                _ = prune.tick() => {
                    if cfg.retention.enabled {
                        self.prune(&cfg);
                    }
                }
                _ = summarize.tick() => {
                    let written = self.summarizer.run_due(Utc::now()).await;
                    if written > 0 {
                        info!(written, "chat summaries refreshed");
                    }
                }
                _ = proactive.tick() => {
                    if cfg.proactive.enabled && self.proactive_tx.is_some() {
                        self.proactive_tick(&cfg).await;
                    }
                }
                _ = sample.tick() => {
                    self.sample();
                }
            }
        }
    }

    fn prune(&self, cfg: &gryag_core::config::GryagConfig) {
        let cutoff = Utc::now() - chrono::Duration::days(cfg.retention.days as i64);
        match self.ctx.messages().prune_before(cutoff) {
            Ok(n) if n > 0 => info!(pruned = n, "retention pruned messages"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "message prune failed"),
        }
        if let Err(e) = self.ctx.media().prune_expired(Utc::now()) {
            error!(error = %e, "media cache prune failed");
        }
        if let Err(e) = self
            .ctx
            .feature_limiter()
            .prune(cfg.limits.usage_retention_days)
        {
            error!(error = %e, "usage history prune failed");
        }
        if let Err(e) = self.ctx.facts().apply_decay(Utc::now()) {
            error!(error = %e, "fact decay failed");
        }
    }

    async fn proactive_tick(&self, cfg: &gryag_core::config::GryagConfig) {
        let Some(ref tx) = self.proactive_tx else { return };
        let since = Utc::now() - chrono::Duration::hours(1);
        let chats = match self.ctx.messages().active_chats(since) {
            Ok(chats) => chats,
            Err(e) => {
                error!(error = %e, "proactive chat listing failed");
                return;
            }
        };

        for chat_id in chats.into_iter().take(PROACTIVE_CHATS_PER_TICK) {
            let gate_key = format!("proactive:{chat_id}");
            if !self.proactive_gate.allow(
                &gate_key,
                cfg.proactive.per_chat_daily_cap,
                Duration::from_secs(86_400),
            ) {
                continue;
            }
            let Some(text) = turn::proactive_reply(&self.ctx, chat_id).await else {
                continue;
            };
            // Persist before sending so memory and the chat agree.
            let _ = self.ctx.messages().append(&NewMessage {
                chat_id,
                thread_id: None,
                user_id: None,
                role: Role::Assistant,
                text: text.clone(),
                media_json: None,
                metadata_json: None,
                external_message_id: None,
                reply_to_external_message_id: None,
            });
            if tx.send(ProactiveOutbound { chat_id, text }).await.is_err() {
                debug!("proactive channel closed");
                return;
            }
        }
    }

    fn sample(&self) {
        let messages = self.ctx.messages().count().unwrap_or(-1);
        let facts = self.ctx.facts().count().unwrap_or(-1);
        let windows = self.ctx.episode_monitor().open_windows();
        let breaker = self.ctx.llm().breaker_status();
        debug!(
            messages,
            facts,
            open_windows = windows,
            breaker_failures = breaker.failures,
            breaker_open = breaker.open,
            "resource sample"
        );
    }
}
