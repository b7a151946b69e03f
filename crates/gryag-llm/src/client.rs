//! Resilient wrapper around an `LlmProvider`.
//!
//! The client is the only path the rest of the workspace uses to reach the
//! model. It enforces: capability-based media filtering, the request
//! deadline, the circuit breaker, bounded embedding concurrency, and the
//! tool round-trip cap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use gryag_core::config::{
    BREAKER_COOLDOWN_SECS, BREAKER_THRESHOLD, EMBED_CONCURRENCY, MAX_TOOL_ROUND_TRIPS,
};
use gryag_core::types::MediaKind;

use crate::breaker::{BreakerStatus, CircuitBreaker};
use crate::capabilities::ModelCapabilities;
use crate::error::{LlmError, Result};
use crate::provider::{
    GenerateRequest, GenerateResponse, LlmProvider, Part, ToolDefinition, Turn, TurnRole,
};

/// Executes a single tool call. Implemented by the tool registry. Must not
/// fail: errors are encoded inside the returned JSON object.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn dispatch(&self, name: &str, args: serde_json::Value) -> serde_json::Value;
}

pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    breaker: CircuitBreaker,
    embed_sem: Semaphore,
    caps: ModelCapabilities,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str, timeout: Duration) -> Self {
        let caps = ModelCapabilities::probe(model);
        debug!(?caps, model, "probed model capabilities");
        Self {
            provider,
            breaker: CircuitBreaker::new(
                BREAKER_THRESHOLD,
                Duration::from_secs(BREAKER_COOLDOWN_SECS),
            ),
            embed_sem: Semaphore::new(EMBED_CONCURRENCY),
            caps,
            timeout,
        }
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    /// Run a full generation turn, dispatching tool calls through
    /// `dispatcher` for at most two round-trips.
    pub async fn generate(
        &self,
        system_instruction: Option<String>,
        history: Vec<Turn>,
        user_parts: Vec<Part>,
        tools: &[ToolDefinition],
        dispatcher: Option<&dyn ToolDispatch>,
    ) -> Result<String> {
        self.breaker.check()?;

        let mut turns = history;
        turns.push(Turn {
            role: TurnRole::User,
            parts: user_parts,
        });
        let dropped = filter_media(&mut turns, self.caps);
        if dropped > 0 {
            info!(dropped, "media parts filtered for model capabilities");
        }

        let tools = if self.caps.tools_ok && dispatcher.is_some() {
            tools.to_vec()
        } else {
            Vec::new()
        };
        let mut req = GenerateRequest {
            system_instruction,
            turns,
            tools,
            temperature: None,
        };

        let mut round_trips = 0usize;
        loop {
            let resp = self.call(&req).await?;

            if resp.tool_calls.is_empty() || round_trips >= MAX_TOOL_ROUND_TRIPS {
                return Ok(resp.text);
            }
            let Some(dispatcher) = dispatcher else {
                return Ok(resp.text);
            };
            round_trips += 1;

            // Echo the model's tool-call turn, then answer every call.
            let mut model_parts: Vec<Part> = Vec::new();
            if !resp.text.is_empty() {
                model_parts.push(Part::Text(resp.text.clone()));
            }
            let mut response_parts: Vec<Part> = Vec::new();
            for call in &resp.tool_calls {
                model_parts.push(Part::FunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                });
                let response = dispatcher.dispatch(&call.name, call.args.clone()).await;
                response_parts.push(Part::FunctionResponse {
                    name: call.name.clone(),
                    response,
                });
            }
            req.turns.push(Turn {
                role: TurnRole::Model,
                parts: model_parts,
            });
            req.turns.push(Turn {
                role: TurnRole::User,
                parts: response_parts,
            });
        }
    }

    /// One-shot text generation without history or tools (summaries, topic
    /// lines, extraction prompts).
    pub async fn generate_text(
        &self,
        system_instruction: Option<String>,
        prompt: String,
        temperature: Option<f32>,
    ) -> Result<String> {
        self.breaker.check()?;
        let req = GenerateRequest {
            system_instruction,
            turns: vec![Turn::user(prompt)],
            tools: Vec::new(),
            temperature,
        };
        Ok(self.call(&req).await?.text)
    }

    /// Embed a text under the concurrency semaphore.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.breaker.check()?;
        let _permit = self
            .embed_sem
            .acquire()
            .await
            .map_err(|_| LlmError::Unavailable("embedding semaphore closed".into()))?;

        match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(Ok(vec)) => {
                self.breaker.record_success();
                Ok(vec)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(LlmError::Unavailable("embed deadline exceeded".into()))
            }
        }
    }

    /// Search-grounded one-shot generation.
    pub async fn generate_grounded(&self, query: &str) -> Result<String> {
        self.breaker.check()?;
        match tokio::time::timeout(self.timeout, self.provider.generate_grounded(query)).await {
            Ok(Ok(text)) => {
                self.breaker.record_success();
                Ok(text)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(LlmError::Unavailable("deadline exceeded".into()))
            }
        }
    }

    async fn call(&self, req: &GenerateRequest) -> Result<GenerateResponse> {
        match tokio::time::timeout(self.timeout, self.provider.generate(req)).await {
            Ok(Ok(resp)) => {
                self.breaker.record_success();
                Ok(resp)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(LlmError::Unavailable("generate deadline exceeded".into()))
            }
        }
    }
}

/// Drop media parts the model cannot accept. Photos and documents pass
/// everywhere; audio and video require the matching capability bit.
fn filter_media(turns: &mut [Turn], caps: ModelCapabilities) -> usize {
    let mut dropped = 0usize;
    for turn in turns.iter_mut() {
        turn.parts.retain(|part| match part {
            Part::InlineData { kind, .. } => {
                let keep = match kind {
                    MediaKind::Photo | MediaKind::Document => true,
                    MediaKind::Audio | MediaKind::Voice => caps.audio_ok,
                    MediaKind::Video => caps.video_ok,
                };
                if !keep {
                    dropped += 1;
                }
                keep
            }
            _ => true,
        });
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: pops pre-programmed responses, counts calls.
    struct MockProvider {
        responses: Mutex<Vec<Result<GenerateResponse>>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(responses: Vec<Result<GenerateResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn with_tool_calls() -> GenerateResponse {
            GenerateResponse {
                text: String::new(),
                tool_calls: vec![crate::provider::ToolCall {
                    name: "calculator".into(),
                    args: serde_json::json!({"expression": "2+2"}),
                }],
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(GenerateResponse {
                    text: "done".into(),
                    tool_calls: vec![],
                })
            } else {
                responses.remove(0)
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1, 0.2])
        }

        async fn generate_grounded(&self, _query: &str) -> Result<String> {
            Ok("grounded".into())
        }
    }

    struct CountingDispatcher(AtomicUsize);

    #[async_trait]
    impl ToolDispatch for CountingDispatcher {
        async fn dispatch(&self, _name: &str, _args: serde_json::Value) -> serde_json::Value {
            self.0.fetch_add(1, Ordering::SeqCst);
            serde_json::json!({"result": 4})
        }
    }

    fn client(provider: Arc<dyn LlmProvider>) -> LlmClient {
        LlmClient::new(provider, "gemini-2.5-flash", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn plain_generation_returns_text() {
        let provider = Arc::new(MockProvider::new(vec![Ok(GenerateResponse {
            text: "привіт".into(),
            tool_calls: vec![],
        })]));
        let c = client(provider);
        let text = c
            .generate(None, vec![], vec![Part::Text("hi".into())], &[], None)
            .await
            .unwrap();
        assert_eq!(text, "привіт");
    }

    #[tokio::test]
    async fn tool_round_trips_capped_at_two() {
        // Provider always requests a tool call; the loop must stop after
        // two dispatch cycles (three generate calls total).
        let provider = Arc::new(MockProvider::new(vec![
            Ok(MockProvider::with_tool_calls()),
            Ok(MockProvider::with_tool_calls()),
            Ok(MockProvider::with_tool_calls()),
            Ok(MockProvider::with_tool_calls()),
        ]));
        let dispatcher = CountingDispatcher(AtomicUsize::new(0));
        let c = client(Arc::clone(&provider) as Arc<dyn LlmProvider>);

        let tools = [ToolDefinition {
            name: "calculator".into(),
            description: "лічба".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        c.generate(
            None,
            vec![],
            vec![Part::Text("порахуй".into())],
            &tools,
            Some(&dispatcher),
        )
        .await
        .unwrap();

        assert_eq!(dispatcher.0.load(Ordering::SeqCst), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_opens_after_three_failures() {
        let provider = Arc::new(MockProvider::new(vec![
            Err(LlmError::Api { status: 500, message: "boom".into() }),
            Err(LlmError::Api { status: 500, message: "boom".into() }),
            Err(LlmError::Api { status: 500, message: "boom".into() }),
        ]));
        let c = client(Arc::clone(&provider) as Arc<dyn LlmProvider>);

        for _ in 0..3 {
            let r = c
                .generate(None, vec![], vec![Part::Text("x".into())], &[], None)
                .await;
            assert!(r.is_err());
        }
        // Fourth call fails immediately without reaching the provider.
        let r = c
            .generate(None, vec![], vec![Part::Text("x".into())], &[], None)
            .await;
        assert!(matches!(r, Err(LlmError::Unavailable(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn media_filter_drops_unsupported_kinds() {
        let mut turns = vec![Turn {
            role: TurnRole::User,
            parts: vec![
                Part::Text("дивись".into()),
                Part::InlineData {
                    kind: MediaKind::Photo,
                    mime: "image/jpeg".into(),
                    data_b64: "aGk=".into(),
                },
                Part::InlineData {
                    kind: MediaKind::Video,
                    mime: "video/mp4".into(),
                    data_b64: "aGk=".into(),
                },
            ],
        }];
        let caps = ModelCapabilities {
            audio_ok: false,
            video_ok: false,
            tools_ok: true,
        };
        assert_eq!(filter_media(&mut turns, caps), 1);
        assert_eq!(turns[0].parts.len(), 2);
    }

    #[tokio::test]
    async fn embed_succeeds_under_semaphore() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let c = client(provider);
        assert_eq!(c.embed("текст").await.unwrap(), vec![0.1, 0.2]);
    }
}
