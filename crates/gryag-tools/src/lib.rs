//! Tool system: the `Tool` trait, the per-turn registry with feature gating
//! and error-isolated dispatch, and the built-in tools.

pub mod calculator;
pub mod currency;
pub mod recall;
pub mod registry;
pub mod remember;
pub mod search;
pub mod weather;

use async_trait::async_trait;

pub use registry::ToolRegistry;

/// Result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// JSON payload returned to the model.
    pub value: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(value: serde_json::Value) -> Self {
        Self {
            value,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            value: serde_json::json!({"error": message.into()}),
            is_error: true,
        }
    }
}

/// Trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, e.g. "weather".
    fn name(&self) -> &str;
    /// Description shown to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters(&self) -> serde_json::Value;
    /// Execute with decoded JSON arguments.
    async fn execute(&self, args: serde_json::Value) -> ToolResult;
}
