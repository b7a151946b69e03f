//! Shared context interface for channel adapters and background loops.
//!
//! `BotContext` is the single trait an adapter host must implement. It is
//! defined here so the adapter crates depend on gryag-agent and not on each
//! other; the binary's `AppState` is the one real implementation.

use std::sync::Arc;

use gryag_context::{ContextAssembler, HybridSearch};
use gryag_core::config::GryagConfig;
use gryag_episodes::EpisodeMonitor;
use gryag_facts::FactExtractor;
use gryag_limits::{FeatureLimiter, GlobalRateLimiter};
use gryag_llm::LlmClient;
use gryag_memory::bans::BanStore;
use gryag_memory::facts::FactStore;
use gryag_memory::media::MediaCache;
use gryag_memory::prompts::PromptStore;
use gryag_memory::store::MessageStore;

use crate::locks::TurnLocks;

pub trait BotContext: Send + Sync {
    fn config(&self) -> &GryagConfig;
    fn messages(&self) -> &MessageStore;
    fn facts(&self) -> &FactStore;
    fn prompts(&self) -> &PromptStore;
    fn bans(&self) -> &BanStore;
    fn media(&self) -> &MediaCache;
    fn llm(&self) -> &Arc<LlmClient>;
    fn global_limiter(&self) -> &GlobalRateLimiter;
    fn feature_limiter(&self) -> &Arc<FeatureLimiter>;
    fn assembler(&self) -> &ContextAssembler;
    fn search(&self) -> &Arc<HybridSearch>;
    fn episode_monitor(&self) -> &Arc<EpisodeMonitor>;
    fn fact_extractor(&self) -> &Arc<FactExtractor>;
    fn turn_locks(&self) -> &TurnLocks;

    fn is_admin(&self, user_id: i64) -> bool {
        self.config().telegram.admin_user_ids.contains(&user_id)
    }
}
