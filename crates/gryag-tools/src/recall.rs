//! Memory recall tool: lets the model search the chat's own history
//! through the hybrid engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use gryag_context::HybridSearch;

use crate::{Tool, ToolResult};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 10;

pub struct RecallTool {
    search: Arc<HybridSearch>,
    chat_id: i64,
}

impl RecallTool {
    pub fn new(search: Arc<HybridSearch>, chat_id: i64) -> Self {
        Self { search, chat_id }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall_messages"
    }

    fn description(&self) -> &str {
        "Шукає в історії цього чату повідомлення за запитом"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": MAX_LIMIT}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::error("query required");
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let hits = self.search.search(self.chat_id, query, limit).await;
        let results: Vec<Value> = hits
            .into_iter()
            .map(|h| json!({"role": h.role.to_string(), "content": h.content}))
            .collect();
        ToolResult::success(json!({"query": query, "messages": results}))
    }
}
