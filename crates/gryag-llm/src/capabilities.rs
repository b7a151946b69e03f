//! Model capability probes.
//!
//! Capabilities are derived once at construction from the model name using
//! the rule set below, in order; the first matching rule wins:
//!
//! 1. names containing `embedding`          → no audio, no video, no tools
//! 2. names containing `gemma`              → no audio, no video, no tools
//! 3. names containing `lite`               → no audio, no video, tools ok
//! 4. names containing `flash` or `pro`     → audio, video, and tools ok
//! 5. anything else                         → no audio, no video, tools ok
//!
//! Rule 5 is the most permissive *safe* default: unknown models keep tool
//! calling (failures there are recoverable) but media is dropped up front
//! rather than risking a hard request rejection.

/// What a configured model can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub audio_ok: bool,
    pub video_ok: bool,
    pub tools_ok: bool,
}

impl ModelCapabilities {
    pub fn probe(model: &str) -> Self {
        let name = model.to_lowercase();
        if name.contains("embedding") || name.contains("gemma") {
            return Self {
                audio_ok: false,
                video_ok: false,
                tools_ok: false,
            };
        }
        if name.contains("lite") {
            return Self {
                audio_ok: false,
                video_ok: false,
                tools_ok: true,
            };
        }
        if name.contains("flash") || name.contains("pro") {
            return Self {
                audio_ok: true,
                video_ok: true,
                tools_ok: true,
            };
        }
        Self {
            audio_ok: false,
            video_ok: false,
            tools_ok: true,
        }
    }
}
