//! Gemini REST provider (`generateContent` / `embedContent`).
//!
//! Owns API-key rotation and the system-instruction downgrade. Everything
//! resilience-related (breaker, deadlines, semaphore) lives in `LlmClient`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::provider::{
    GenerateRequest, GenerateResponse, LlmProvider, Part, ToolCall, Turn, TurnRole,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_keys: Vec<String>,
    key_index: AtomicUsize,
    model: String,
    embed_model: String,
    /// Set once the API rejects a system_instruction payload; afterwards the
    /// instruction is prepended as the first user turn instead.
    system_instruction_unsupported: AtomicBool,
}

impl GeminiProvider {
    pub fn new(api_keys: Vec<String>, model: String, embed_model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_keys,
            key_index: AtomicUsize::new(0),
            model,
            embed_model,
            system_instruction_unsupported: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn current_key(&self) -> &str {
        let i = self.key_index.load(Ordering::Relaxed) % self.api_keys.len();
        &self.api_keys[i]
    }

    /// Rotate to the next key after a failure.
    fn rotate_key(&self) {
        if self.api_keys.len() > 1 {
            let next = (self.key_index.load(Ordering::Relaxed) + 1) % self.api_keys.len();
            self.key_index.store(next, Ordering::Relaxed);
            debug!(key_index = next, "rotated Gemini API key");
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.current_key())])
            .json(body)
            .send()
            .await
            .inspect_err(|_| self.rotate_key())?;

        let status = resp.status().as_u16();
        if status == 429 {
            self.rotate_key();
            return Err(LlmError::RateLimited);
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            self.rotate_key();
            if message.to_lowercase().contains("resource") && message.to_lowercase().contains("exhausted") {
                return Err(LlmError::RateLimited);
            }
            warn!(status, "Gemini API error");
            return Err(LlmError::Api { status, message });
        }
        resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))
    }

    fn build_body(&self, req: &GenerateRequest, inline_system: bool) -> Value {
        let mut contents: Vec<Value> = Vec::with_capacity(req.turns.len() + 1);

        if inline_system {
            if let Some(ref sys) = req.system_instruction {
                contents.push(json!({
                    "role": "user",
                    "parts": [{"text": sys}],
                }));
            }
        }
        contents.extend(req.turns.iter().map(turn_to_json));

        let mut body = json!({
            "contents": contents,
            "safetySettings": safety_settings(),
        });
        if !inline_system {
            if let Some(ref sys) = req.system_instruction {
                body["system_instruction"] = json!({"parts": [{"text": sys}]});
            }
        }
        if !req.tools.is_empty() {
            body["tools"] = json!([{
                "function_declarations": req.tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]);
        }
        if let Some(temp) = req.temperature {
            body["generationConfig"] = json!({"temperature": temp});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{BASE_URL}/models/{}:generateContent", self.model);
        let inline = self.system_instruction_unsupported.load(Ordering::Relaxed);
        let body = self.build_body(req, inline);

        let result = self.post(&url, &body).await;
        let raw = match result {
            Ok(raw) => raw,
            Err(LlmError::Api { status: 400, ref message })
                if !inline && mentions_system_instruction(message) =>
            {
                // Provider rejected the dedicated system payload: downgrade
                // to a prepended user turn and remember it.
                self.system_instruction_unsupported
                    .store(true, Ordering::Relaxed);
                warn!("system_instruction rejected, downgrading to inline prompt");
                let body = self.build_body(req, true);
                self.post(&url, &body).await?
            }
            Err(e) => return Err(e),
        };

        parse_generate_response(&raw)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{BASE_URL}/models/{}:embedContent", self.embed_model);
        let body = json!({
            "content": {"parts": [{"text": text}]},
        });
        let raw = self.post(&url, &body).await?;
        let values = raw
            .pointer("/embedding/values")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Parse("embedContent response missing values".into()))?;
        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }

    async fn generate_grounded(&self, query: &str) -> Result<String> {
        let url = format!("{BASE_URL}/models/{}:generateContent", self.model);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": query}]}],
            "tools": [{"google_search": {}}],
            "safetySettings": safety_settings(),
        });
        let raw = self.post(&url, &body).await?;
        Ok(parse_generate_response(&raw)?.text)
    }
}

fn turn_to_json(turn: &Turn) -> Value {
    let role = match turn.role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    };
    let parts: Vec<Value> = turn
        .parts
        .iter()
        .map(|part| match part {
            Part::Text(text) => json!({"text": text}),
            Part::InlineData { mime, data_b64, .. } => json!({
                "inline_data": {"mime_type": mime, "data": data_b64},
            }),
            Part::FunctionCall { name, args } => json!({
                "functionCall": {"name": name, "args": args},
            }),
            Part::FunctionResponse { name, response } => json!({
                "functionResponse": {"name": name, "response": response},
            }),
        })
        .collect();
    json!({"role": role, "parts": parts})
}

fn parse_generate_response(raw: &Value) -> Result<GenerateResponse> {
    let parts = raw
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &parts {
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call.get("args").cloned().unwrap_or(json!({}));
            tool_calls.push(ToolCall { name, args });
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        // Blocked or empty candidate; surface the finish reason if present.
        let reason = raw
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .unwrap_or("empty response");
        return Err(LlmError::Parse(format!("no content: {reason}")));
    }

    Ok(GenerateResponse { text, tool_calls })
}

fn mentions_system_instruction(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("system_instruction")
        || lower.contains("system instruction")
        || lower.contains("developer instruction")
}

fn safety_settings() -> Value {
    json!([
        {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"}
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use gryag_core::types::MediaKind;

    #[test]
    fn turn_serialization_covers_all_parts() {
        let turn = Turn {
            role: TurnRole::Model,
            parts: vec![
                Part::Text("hi".into()),
                Part::InlineData {
                    kind: MediaKind::Photo,
                    mime: "image/jpeg".into(),
                    data_b64: "aGk=".into(),
                },
                Part::FunctionCall {
                    name: "weather".into(),
                    args: json!({"city": "Kyiv"}),
                },
            ],
        };
        let v = turn_to_json(&turn);
        assert_eq!(v["role"], "model");
        assert_eq!(v["parts"][0]["text"], "hi");
        assert_eq!(v["parts"][1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(v["parts"][2]["functionCall"]["name"], "weather");
    }

    #[test]
    fn response_parsing_extracts_text_and_calls() {
        let raw = json!({
            "candidates": [{"content": {"parts": [
                {"text": "зараз гляну"},
                {"functionCall": {"name": "weather", "args": {"city": "Kyiv"}}}
            ]}}]
        });
        let resp = parse_generate_response(&raw).unwrap();
        assert_eq!(resp.text, "зараз гляну");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "weather");
    }

    #[test]
    fn empty_candidate_is_a_parse_error() {
        let raw = json!({"candidates": [{"finishReason": "SAFETY", "content": {"parts": []}}]});
        let err = parse_generate_response(&raw).unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn system_instruction_rejection_detector() {
        assert!(mentions_system_instruction(
            "Invalid JSON payload: unknown field system_instruction"
        ));
        assert!(!mentions_system_instruction("quota exceeded"));
    }
}
