//! Durable memory for gryag: one WAL-mode SQLite file holding messages,
//! facts, episodes, chat summaries, system prompts, bans, and the media
//! cache. Quota history tables are owned by gryag-limits on the same file.
//!
//! The persistence layer exclusively owns all rows; other components hold
//! ids and re-fetch on demand.

pub mod bans;
pub mod db;
pub mod embedding;
pub mod episodes;
pub mod error;
pub mod facts;
pub mod media;
pub mod prompts;
pub mod store;
pub mod summaries;
pub mod types;

pub use db::Db;
pub use error::{MemoryError, Result};
