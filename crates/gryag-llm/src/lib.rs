//! LLM access for gryag: the provider contract, the Gemini implementation,
//! and the resilient client wrapper that owns capability filtering, the
//! circuit breaker, embedding concurrency, and the bounded tool loop.

pub mod breaker;
pub mod capabilities;
pub mod client;
pub mod error;
pub mod gemini;
pub mod provider;

pub use breaker::CircuitBreaker;
pub use client::{LlmClient, ToolDispatch};
pub use error::{LlmError, Result};
pub use provider::{GenerateRequest, GenerateResponse, LlmProvider, Part, ToolCall, ToolDefinition, Turn, TurnRole};
