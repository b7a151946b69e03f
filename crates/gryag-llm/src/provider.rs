use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gryag_core::types::MediaKind;

use crate::error::Result;

/// Who authored a turn on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// One piece of a turn's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Base64-encoded media payload.
    InlineData {
        kind: MediaKind,
        mime: String,
        data_b64: String,
    },
    FunctionCall {
        name: String,
        args: serde_json::Value,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

/// One conversation turn sent to the provider.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// Tool declaration exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

/// Request to a provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
}

/// Provider response: concatenated text plus any requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Contract the core consumes. The Gemini implementation ships as reference;
/// tests substitute scripted providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One-shot generation with provider-side search grounding.
    async fn generate_grounded(&self, query: &str) -> Result<String>;
}
