//! Per-turn tool registry and dispatcher.
//!
//! A tool is visible to the model only while its enable flag is set. The
//! dispatcher never raises: unknown names, quota denials, and handler
//! panics all come back as localized JSON error objects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use gryag_core::texts;
use gryag_limits::FeatureLimiter;
use gryag_llm::{ToolDefinition, ToolDispatch};

use crate::{Tool, ToolResult};

struct Entry {
    tool: Box<dyn Tool>,
    enabled: bool,
    rate_limit_feature: Option<String>,
}

pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    /// Insertion order, so definitions stay stable between requests.
    order: Vec<String>,
    limiter: Arc<FeatureLimiter>,
    user_id: i64,
}

impl ToolRegistry {
    /// A registry is built per turn; `user_id` scopes the feature quotas.
    pub fn new(limiter: Arc<FeatureLimiter>, user_id: i64) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            limiter,
            user_id,
        }
    }

    pub fn register(
        &mut self,
        tool: Box<dyn Tool>,
        enabled: bool,
        rate_limit_feature: Option<&str>,
    ) {
        let name = tool.name().to_string();
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Entry {
                tool,
                enabled,
                rate_limit_feature: rate_limit_feature.map(str::to_string),
            },
        );
    }

    /// Definitions for every enabled tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .filter(|e| e.enabled)
            .map(|e| ToolDefinition {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.entries.values().any(|e| e.enabled)
    }

    async fn dispatch_inner(&self, name: &str, args: Value) -> Value {
        let Some(entry) = self.entries.get(name).filter(|e| e.enabled) else {
            debug!(tool = name, "unknown tool requested");
            return json!({"error": texts::UNKNOWN_TOOL});
        };

        if let Some(ref feature) = entry.rate_limit_feature {
            match self.limiter.allow(self.user_id, feature) {
                Ok(true) => {}
                Ok(false) => {
                    return json!({"error": texts::TOOL_THROTTLED, "throttled": true});
                }
                Err(e) => {
                    warn!(error = %e, tool = name, "quota check failed");
                    return json!({"error": texts::TOOL_FAILED});
                }
            }
        }

        // Isolate handler panics from the turn.
        let result = std::panic::AssertUnwindSafe(entry.tool.execute(args))
            .catch_unwind()
            .await;
        let result = match result {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, "tool handler panicked");
                ToolResult::error(texts::TOOL_FAILED)
            }
        };

        if !result.is_error {
            if let Some(ref feature) = entry.rate_limit_feature {
                if let Err(e) = self.limiter.record_usage(self.user_id, feature) {
                    warn!(error = %e, tool = name, "usage record failed");
                }
            }
        }
        normalize(result)
    }
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    async fn dispatch(&self, name: &str, args: Value) -> Value {
        self.dispatch_inner(name, args).await
    }
}

/// The model always receives a JSON object.
fn normalize(result: ToolResult) -> Value {
    match result.value {
        Value::Object(_) => result.value,
        other => json!({"result": other}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gryag_limits::FeatureQuota;
    use gryag_memory::Db;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "повертає аргументи"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> ToolResult {
            ToolResult::success(json!({"echo": args}))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "завжди падає"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            panic!("boom");
        }
    }

    fn limiter(per_hour: u32) -> Arc<FeatureLimiter> {
        let db = Db::open_in_memory().unwrap();
        gryag_limits::db::init_db(&db).unwrap();
        let mut quotas = HashMap::new();
        quotas.insert("echo".to_string(), FeatureQuota { per_hour, per_day: 100 });
        Arc::new(FeatureLimiter::new(db, quotas, vec![], true, false))
    }

    #[tokio::test]
    async fn dispatch_returns_tool_output() {
        let mut r = ToolRegistry::new(limiter(10), 42);
        r.register(Box::new(EchoTool), true, None);
        let out = r.dispatch("echo", json!({"x": 1})).await;
        assert_eq!(out["echo"]["x"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_object() {
        let r = ToolRegistry::new(limiter(10), 42);
        let out = r.dispatch("nope", json!({})).await;
        assert!(out["error"].is_string());
    }

    #[tokio::test]
    async fn disabled_tool_is_invisible_and_undispatchable() {
        let mut r = ToolRegistry::new(limiter(10), 42);
        r.register(Box::new(EchoTool), false, None);
        assert!(r.definitions().is_empty());
        let out = r.dispatch("echo", json!({})).await;
        assert!(out["error"].is_string());
    }

    #[tokio::test]
    async fn quota_denial_returns_throttle_object() {
        let mut r = ToolRegistry::new(limiter(1), 42);
        r.register(Box::new(EchoTool), true, Some("echo"));
        let first = r.dispatch("echo", json!({})).await;
        assert!(first.get("error").is_none());
        let second = r.dispatch("echo", json!({})).await;
        assert_eq!(second["throttled"], true);
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let mut r = ToolRegistry::new(limiter(10), 42);
        r.register(Box::new(PanickyTool), true, None);
        let out = r.dispatch("panic", json!({})).await;
        assert!(out["error"].is_string());
    }
}
