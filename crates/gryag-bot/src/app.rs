//! Application state: one struct owning every component, implementing the
//! `BotContext` the adapter, orchestrator, and scheduler share.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gryag_context::{ContextAssembler, HybridSearch};
use gryag_core::config::GryagConfig;
use gryag_episodes::{ChatSummarizer, EpisodeMonitor};
use gryag_facts::FactExtractor;
use gryag_limits::{FeatureLimiter, FeatureQuota, GlobalRateLimiter};
use gryag_llm::gemini::GeminiProvider;
use gryag_llm::LlmClient;
use gryag_memory::bans::BanStore;
use gryag_memory::episodes::EpisodeStore;
use gryag_memory::facts::FactStore;
use gryag_memory::media::MediaCache;
use gryag_memory::prompts::PromptStore;
use gryag_memory::store::MessageStore;
use gryag_memory::summaries::SummaryStore;
use gryag_memory::Db;

use gryag_agent::{BotContext, TurnLocks};

pub struct AppState {
    config: GryagConfig,
    messages: MessageStore,
    facts: FactStore,
    prompts: PromptStore,
    bans: BanStore,
    media: MediaCache,
    llm: Arc<LlmClient>,
    global_limiter: GlobalRateLimiter,
    feature_limiter: Arc<FeatureLimiter>,
    assembler: ContextAssembler,
    search: Arc<HybridSearch>,
    episode_monitor: Arc<EpisodeMonitor>,
    fact_extractor: Arc<FactExtractor>,
    turn_locks: TurnLocks,
    pub summarizer: Arc<ChatSummarizer>,
}

impl AppState {
    pub fn new(config: GryagConfig) -> anyhow::Result<Self> {
        let db = Db::open(&config.database.path)?;
        gryag_limits::db::init_db(&db)?;

        let provider = Arc::new(GeminiProvider::new(
            config.gemini.api_keys.clone(),
            config.gemini.model.clone(),
            config.gemini.embed_model.clone(),
        ));
        let llm = Arc::new(LlmClient::new(
            provider,
            &config.gemini.model,
            Duration::from_secs(config.gemini.timeout_secs),
        ));

        let messages = MessageStore::new(db.clone());
        let facts = FactStore::new(db.clone());
        let summaries = SummaryStore::new(db.clone());
        let episode_store = EpisodeStore::new(db.clone());

        let assembler = ContextAssembler::new(
            messages.clone(),
            facts.clone(),
            summaries.clone(),
            episode_store.clone(),
            Some(Arc::clone(&llm)),
            config.context.clone(),
        );
        let search = Arc::new(HybridSearch::new(
            messages.clone(),
            Some(Arc::clone(&llm)),
            config.context.clone(),
        ));
        let episode_monitor = Arc::new(EpisodeMonitor::new(
            episode_store,
            Some(Arc::clone(&llm)),
            config.episodes.clone(),
        ));
        let fact_extractor = Arc::new(FactExtractor::new(
            facts.clone(),
            Some(Arc::clone(&llm)),
        ));
        let summarizer = Arc::new(ChatSummarizer::new(
            messages.clone(),
            summaries,
            Arc::clone(&llm),
            config.summarizer.clone(),
        ));

        let admin_ids = config.telegram.admin_user_ids.clone();
        let global_limiter = GlobalRateLimiter::new(
            db.clone(),
            config.limits.per_user_per_hour,
            admin_ids.clone(),
        );
        let feature_limiter = Arc::new(FeatureLimiter::new(
            db.clone(),
            feature_quotas(&config),
            admin_ids,
            config.limits.enable_feature_throttling,
            config.limits.enable_adaptive_throttling,
        ));

        Ok(Self {
            prompts: PromptStore::new(db.clone()),
            bans: BanStore::new(db.clone()),
            media: MediaCache::new(db),
            messages,
            facts,
            llm,
            global_limiter,
            feature_limiter,
            assembler,
            search,
            episode_monitor,
            fact_extractor,
            turn_locks: TurnLocks::new(),
            summarizer,
            config,
        })
    }
}

/// Per-feature quotas. Unlisted features fail open in the limiter.
fn feature_quotas(config: &GryagConfig) -> HashMap<String, FeatureQuota> {
    let mut quotas = HashMap::new();
    quotas.insert("weather".to_string(), FeatureQuota { per_hour: 10, per_day: 50 });
    quotas.insert("currency".to_string(), FeatureQuota { per_hour: 10, per_day: 50 });
    quotas.insert("search".to_string(), FeatureQuota { per_hour: 5, per_day: 20 });
    quotas.insert(
        "images".to_string(),
        FeatureQuota {
            per_hour: config.tools.image_generation_daily_limit.max(1),
            per_day: config.tools.image_generation_daily_limit,
        },
    );
    quotas
}

impl BotContext for AppState {
    fn config(&self) -> &GryagConfig {
        &self.config
    }
    fn messages(&self) -> &MessageStore {
        &self.messages
    }
    fn facts(&self) -> &FactStore {
        &self.facts
    }
    fn prompts(&self) -> &PromptStore {
        &self.prompts
    }
    fn bans(&self) -> &BanStore {
        &self.bans
    }
    fn media(&self) -> &MediaCache {
        &self.media
    }
    fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }
    fn global_limiter(&self) -> &GlobalRateLimiter {
        &self.global_limiter
    }
    fn feature_limiter(&self) -> &Arc<FeatureLimiter> {
        &self.feature_limiter
    }
    fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }
    fn search(&self) -> &Arc<HybridSearch> {
        &self.search
    }
    fn episode_monitor(&self) -> &Arc<EpisodeMonitor> {
        &self.episode_monitor
    }
    fn fact_extractor(&self) -> &Arc<FactExtractor> {
        &self.fact_extractor
    }
    fn turn_locks(&self) -> &TurnLocks {
        &self.turn_locks
    }
}
