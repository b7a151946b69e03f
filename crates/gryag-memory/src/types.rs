use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gryag_core::types::Role;

/// A message row as stored.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub user_id: Option<i64>,
    pub role: Role,
    pub text: String,
    pub media_json: Option<String>,
    pub metadata_json: Option<String>,
    pub external_message_id: Option<i64>,
    pub reply_to_external_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new message. Embeddings arrive later.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub user_id: Option<i64>,
    pub role: Role,
    pub text: String,
    pub media_json: Option<String>,
    pub metadata_json: Option<String>,
    pub external_message_id: Option<i64>,
    pub reply_to_external_message_id: Option<i64>,
}

/// Whom a fact is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Chat,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Closed category set for extracted facts. Extractor output outside this
/// enumeration is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Personal,
    Preference,
    Profession,
    Interest,
    Opinion,
    Relationship,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Personal => "personal",
            Self::Preference => "preference",
            Self::Profession => "profession",
            Self::Interest => "interest",
            Self::Opinion => "opinion",
            Self::Relationship => "relationship",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "preference" => Ok(Self::Preference),
            "profession" => Ok(Self::Profession),
            "interest" => Ok(Self::Interest),
            "opinion" => Ok(Self::Opinion),
            "relationship" => Ok(Self::Relationship),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

/// A durable, confidence-scored assertion about a user or a chat.
#[derive(Debug, Clone)]
pub struct Fact {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub chat_context: Option<i64>,
    pub category: FactCategory,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub evidence_count: u32,
    pub evidence_text: Option<String>,
    pub source_message_id: Option<i64>,
    pub first_observed: DateTime<Utc>,
    pub last_reinforced: DateTime<Utc>,
    pub is_active: bool,
    pub decay_rate: f64,
}

/// Extractor output: a fact observation before fusion with the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCandidate {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub chat_context: Option<i64>,
    pub category: FactCategory,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub evidence_text: Option<String>,
    pub source_message_id: Option<i64>,
}

/// What the fusion rule did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionOutcome {
    Inserted,
    Reinforced,
    /// Value changed and the candidate won.
    Evolved,
    /// Value conflicted and the existing fact won.
    Contradicted,
}

/// Emotional tone of a finalized episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalValence {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl std::fmt::Display for EmotionalValence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EmotionalValence {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            "mixed" => Ok(Self::Mixed),
            other => Err(format!("unknown valence: {other}")),
        }
    }
}

/// A finalized conversation window promoted to long-term memory.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub topic: String,
    pub summary: String,
    pub importance: f64,
    pub emotional_valence: EmotionalValence,
    pub message_ids: Vec<i64>,
    pub participant_ids: Vec<i64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
}

/// Insert payload for a new episode.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub topic: String,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
    pub importance: f64,
    pub emotional_valence: EmotionalValence,
    pub message_ids: Vec<i64>,
    pub participant_ids: Vec<i64>,
    pub tags: Vec<String>,
}

/// Rollup window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Week,
    Month,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

impl std::str::FromStr for SummaryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown summary kind: {other}")),
        }
    }
}

/// A stored per-chat rollup.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    pub id: i64,
    pub chat_id: i64,
    pub kind: SummaryKind,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub text: String,
    pub token_count: usize,
    pub generated_at: DateTime<Utc>,
}

/// Prompt resolution scope, first hit wins: personal → chat → global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptScope {
    Global,
    Chat,
    Personal,
}

impl PromptScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Chat => "chat",
            Self::Personal => "personal",
        }
    }
}

impl std::str::FromStr for PromptScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "chat" => Ok(Self::Chat),
            "personal" => Ok(Self::Personal),
            other => Err(format!("unknown prompt scope: {other}")),
        }
    }
}

/// A stored system prompt row.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub id: i64,
    pub admin_id: i64,
    pub chat_id: Option<i64>,
    pub scope: PromptScope,
    pub prompt_text: String,
    pub is_active: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BanRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub banned_at: DateTime<Utc>,
    pub last_notice_at: Option<DateTime<Utc>>,
}

/// TTL-bounded pointer to downloaded media, consumed by the image tools.
#[derive(Debug, Clone)]
pub struct MediaCacheEntry {
    pub media_id: String,
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub file_path: String,
    pub media_type: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
