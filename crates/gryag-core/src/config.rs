use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default LLM request deadline in seconds.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 45;
/// Concurrent embedding requests allowed at once.
pub const EMBED_CONCURRENCY: usize = 8;
/// Consecutive LLM failures before the circuit opens.
pub const BREAKER_THRESHOLD: u32 = 3;
/// Seconds the circuit stays open after tripping.
pub const BREAKER_COOLDOWN_SECS: u64 = 60;
/// Maximum tool round-trips per turn.
pub const MAX_TOOL_ROUND_TRIPS: usize = 2;

/// Top-level config (gryag.toml + GRYAG_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GryagConfig {
    pub telegram: TelegramConfig,
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub episodes: EpisodeConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Regex patterns matched against text to classify a message as addressed.
    #[serde(default = "default_trigger_patterns")]
    pub trigger_patterns: Vec<String>,
    /// Empty list means every chat is allowed.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    #[serde(default)]
    pub blocked_chat_ids: Vec<i64>,
    /// Admins bypass quotas and bans and may run privileged commands.
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API keys, rotated on failure.
    pub api_keys: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Global addressed-turn quota per user per hour.
    #[serde(default = "default_per_user_per_hour")]
    pub per_user_per_hour: u32,
    #[serde(default = "bool_true")]
    pub enable_feature_throttling: bool,
    /// Reputation multiplier on feature quotas.
    #[serde(default)]
    pub enable_adaptive_throttling: bool,
    /// Days of feature usage history kept for quota accounting.
    #[serde(default = "default_usage_retention_days")]
    pub usage_retention_days: u32,
    /// Optional distributed backend. When absent (or unsupported) the
    /// in-process gate is used with identical semantics, per-process scope.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_user_per_hour: default_per_user_per_hour(),
            enable_feature_throttling: true,
            enable_adaptive_throttling: false,
            usage_retention_days: default_usage_retention_days(),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Tier shares in percent of the budget. They need not sum to 100.
    #[serde(default = "default_immediate_share")]
    pub immediate_share: u8,
    #[serde(default = "default_recent_share")]
    pub recent_share: u8,
    #[serde(default = "default_relevant_share")]
    pub relevant_share: u8,
    #[serde(default = "default_background_share")]
    pub background_share: u8,
    #[serde(default = "default_episodic_share")]
    pub episodic_share: u8,
    /// Message counts feeding the immediate and recent tiers.
    #[serde(default = "default_immediate_messages")]
    pub immediate_messages: usize,
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
    #[serde(default = "bool_true")]
    pub enable_hybrid_search: bool,
    #[serde(default = "bool_true")]
    pub enable_keyword_search: bool,
    #[serde(default = "bool_true")]
    pub enable_temporal_boosting: bool,
    /// Fusion weights; the sum need not equal 1.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_temporal_weight")]
    pub temporal_weight: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            immediate_share: default_immediate_share(),
            recent_share: default_recent_share(),
            relevant_share: default_relevant_share(),
            background_share: default_background_share(),
            episodic_share: default_episodic_share(),
            immediate_messages: default_immediate_messages(),
            recent_messages: default_recent_messages(),
            enable_hybrid_search: true,
            enable_keyword_search: true,
            enable_temporal_boosting: true,
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            temporal_weight: default_temporal_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_episode_min_messages")]
    pub min_messages: usize,
    #[serde(default = "default_episode_min_importance")]
    pub min_importance: f32,
    #[serde(default = "default_episode_window_timeout")]
    pub window_timeout_seconds: u64,
    #[serde(default = "default_episode_window_max")]
    pub window_max_messages: usize,
    #[serde(default = "default_episode_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_messages: default_episode_min_messages(),
            min_importance: default_episode_min_importance(),
            window_timeout_seconds: default_episode_window_timeout(),
            window_max_messages: default_episode_window_max(),
            sweep_interval_seconds: default_episode_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_retention_days")]
    pub days: u32,
    #[serde(default = "default_retention_interval")]
    pub prune_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: default_retention_days(),
            prune_interval_seconds: default_retention_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Local hour (0..23) at which the daily summarizer runs.
    #[serde(default = "default_summarization_hour")]
    pub hour: u8,
    /// Maximum chats summarized per daily run.
    #[serde(default = "default_summaries_per_day")]
    pub daily_cap: usize,
    /// Chat log truncation bound fed to the model.
    #[serde(default = "default_summary_max_chars")]
    pub max_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_summarization_hour(),
            daily_cap: default_summaries_per_day(),
            max_chars: default_summary_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "bool_true")]
    pub enable_calculator: bool,
    #[serde(default = "bool_true")]
    pub enable_weather: bool,
    #[serde(default = "bool_true")]
    pub enable_currency: bool,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default)]
    pub enable_image_generation: bool,
    #[serde(default = "default_image_daily_limit")]
    pub image_generation_daily_limit: u32,
    #[serde(default)]
    pub enable_sandbox: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_calculator: true,
            enable_weather: true,
            enable_currency: true,
            enable_web_search: false,
            enable_image_generation: false,
            image_generation_daily_limit: default_image_daily_limit(),
            enable_sandbox: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proactive_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_proactive_daily_cap")]
    pub per_chat_daily_cap: u32,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_proactive_interval(),
            per_chat_daily_cap: default_proactive_daily_cap(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_trigger_patterns() -> Vec<String> {
    vec![r"(?i)\bгряг\b".to_string(), r"(?i)\bgryag\b".to_string()]
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_llm_timeout() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}
fn default_db_path() -> String {
    "gryag.db".to_string()
}
fn default_per_user_per_hour() -> u32 {
    5
}
fn default_usage_retention_days() -> u32 {
    7
}
fn default_token_budget() -> usize {
    8000
}
fn default_immediate_share() -> u8 {
    10
}
fn default_recent_share() -> u8 {
    25
}
fn default_relevant_share() -> u8 {
    35
}
fn default_background_share() -> u8 {
    15
}
fn default_episodic_share() -> u8 {
    15
}
fn default_immediate_messages() -> usize {
    5
}
fn default_recent_messages() -> usize {
    30
}
fn default_semantic_weight() -> f32 {
    0.5
}
fn default_keyword_weight() -> f32 {
    1.0
}
fn default_temporal_weight() -> f32 {
    1.0
}
fn default_episode_min_messages() -> usize {
    5
}
fn default_episode_min_importance() -> f32 {
    0.6
}
fn default_episode_window_timeout() -> u64 {
    1800
}
fn default_episode_window_max() -> usize {
    50
}
fn default_episode_sweep_interval() -> u64 {
    300
}
fn default_retention_days() -> u32 {
    90
}
fn default_retention_interval() -> u64 {
    3600
}
fn default_summarization_hour() -> u8 {
    3
}
fn default_summaries_per_day() -> usize {
    50
}
fn default_summary_max_chars() -> usize {
    100_000
}
fn default_image_daily_limit() -> u32 {
    10
}
fn default_proactive_interval() -> u64 {
    1800
}
fn default_proactive_daily_cap() -> u32 {
    2
}

impl GryagConfig {
    /// Load config from a TOML file with GRYAG_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `./gryag.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("gryag.toml");

        let config: GryagConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GRYAG_").split("_"))
            .extract()
            .map_err(|e| crate::error::GryagError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Fatal on nonsense values (ConfigurationInvalid).
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.gemini.api_keys.is_empty() {
            return Err(crate::error::GryagError::Config(
                "gemini.api_keys must contain at least one key".into(),
            ));
        }
        if self.summarizer.hour > 23 {
            return Err(crate::error::GryagError::Config(format!(
                "summarizer.hour must be 0..23, got {}",
                self.summarizer.hour
            )));
        }
        if self.context.token_budget == 0 {
            return Err(crate::error::GryagError::Config(
                "context.token_budget must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> GryagConfig {
        GryagConfig {
            telegram: TelegramConfig {
                token: "123:abc".into(),
                trigger_patterns: default_trigger_patterns(),
                allowed_chat_ids: vec![],
                blocked_chat_ids: vec![],
                admin_user_ids: vec![1],
            },
            gemini: GeminiConfig {
                api_keys: vec!["k1".into()],
                model: default_model(),
                embed_model: default_embed_model(),
                timeout_secs: default_llm_timeout(),
            },
            database: DatabaseConfig::default(),
            limits: LimitsConfig::default(),
            context: ContextConfig::default(),
            episodes: EpisodeConfig::default(),
            retention: RetentionConfig::default(),
            summarizer: SummarizerConfig::default(),
            tools: ToolsConfig::default(),
            proactive: ProactiveConfig::default(),
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn empty_api_keys_rejected() {
        let mut cfg = minimal();
        cfg.gemini.api_keys.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_summarizer_hour_rejected() {
        let mut cfg = minimal();
        cfg.summarizer.hour = 24;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = minimal();
        assert_eq!(cfg.limits.per_user_per_hour, 5);
        assert_eq!(cfg.context.token_budget, 8000);
        assert_eq!(cfg.episodes.min_messages, 5);
        assert!((cfg.episodes.min_importance - 0.6).abs() < f32::EPSILON);
        assert_eq!(cfg.limits.usage_retention_days, 7);
    }
}
