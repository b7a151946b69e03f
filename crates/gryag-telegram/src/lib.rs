//! Telegram channel adapter: long-poll dispatcher, ingress normalization,
//! admin commands, and chunked MarkdownV2 sending. The adapter stays thin;
//! every decision beyond transport mapping lives in gryag-agent.

pub mod adapter;
pub mod commands;
pub mod handler;
pub mod ingest;
pub mod send;
pub mod typing;

pub use adapter::TelegramAdapter;

/// Identity of the running bot, resolved once at startup.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: u64,
    pub username: String,
}
