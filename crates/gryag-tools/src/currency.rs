//! Currency conversion tool backed by the open.er-api.com daily rates.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolResult};

const RATES_URL: &str = "https://open.er-api.com/v6/latest";

pub struct CurrencyTool {
    client: reqwest::Client,
}

impl CurrencyTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for CurrencyTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrencyTool {
    fn name(&self) -> &str {
        "currency"
    }

    fn description(&self) -> &str {
        "Конвертує суму між валютами за сьогоднішнім курсом"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number"},
                "from": {"type": "string", "description": "код валюти, напр. USD"},
                "to": {"type": "string", "description": "код валюти, напр. UAH"}
            },
            "required": ["amount", "from", "to"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let amount = args.get("amount").and_then(Value::as_f64);
        let from = args.get("from").and_then(Value::as_str);
        let to = args.get("to").and_then(Value::as_str);
        let (Some(amount), Some(from), Some(to)) = (amount, from, to) else {
            return ToolResult::error("amount, from, to required");
        };
        let from = from.to_uppercase();
        let to = to.to_uppercase();

        let rates: Value = match self
            .client
            .get(format!("{RATES_URL}/{from}"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => return ToolResult::error(format!("rates parse failed: {e}")),
            },
            Err(e) => {
                debug!(error = %e, %from, "rates fetch failed");
                return ToolResult::error("курси недоступні");
            }
        };

        let Some(rate) = rates.pointer(&format!("/rates/{to}")).and_then(Value::as_f64) else {
            return ToolResult::error(format!("невідома валюта: {to}"));
        };

        ToolResult::success(json!({
            "amount": amount,
            "from": from,
            "to": to,
            "rate": rate,
            "converted": amount * rate,
        }))
    }
}
