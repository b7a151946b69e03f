//! Per-turn tool registry assembly. Enable flags come from config; quota
//! features are named after the tools they gate.

use std::sync::Arc;

use gryag_tools::{
    calculator::CalculatorTool, currency::CurrencyTool, recall::RecallTool,
    remember::RememberTool, search::WebSearchTool, weather::WeatherTool, ToolRegistry,
};

use crate::context::BotContext;

/// Build the tool registry for one turn in `chat_id` by `user_id`.
pub fn build_registry<C: BotContext>(ctx: &Arc<C>, chat_id: i64, user_id: i64) -> ToolRegistry {
    let tools_cfg = &ctx.config().tools;
    let mut registry = ToolRegistry::new(Arc::clone(ctx.feature_limiter()), user_id);

    registry.register(
        Box::new(CalculatorTool),
        tools_cfg.enable_calculator,
        None,
    );
    registry.register(
        Box::new(WeatherTool::new()),
        tools_cfg.enable_weather,
        Some("weather"),
    );
    registry.register(
        Box::new(CurrencyTool::new()),
        tools_cfg.enable_currency,
        Some("currency"),
    );
    registry.register(
        Box::new(WebSearchTool::new(Arc::clone(ctx.llm()))),
        tools_cfg.enable_web_search,
        Some("search"),
    );
    registry.register(
        Box::new(RecallTool::new(Arc::clone(ctx.search()), chat_id)),
        true,
        None,
    );
    registry.register(
        Box::new(RememberTool::new(ctx.facts().clone(), chat_id, user_id)),
        true,
        None,
    );

    registry
}
