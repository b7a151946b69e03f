//! Web search tool: delegates to the provider's search-grounded generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use gryag_llm::LlmClient;

use crate::{Tool, ToolResult};

pub struct WebSearchTool {
    llm: Arc<LlmClient>,
}

impl WebSearchTool {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Шукає свіжу інформацію в інтернеті"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::error("query required");
        };
        match self.llm.generate_grounded(query).await {
            Ok(answer) => ToolResult::success(json!({"query": query, "answer": answer})),
            Err(e) => ToolResult::error(format!("пошук не вдався: {e}")),
        }
    }
}
