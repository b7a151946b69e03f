//! Long-term conversation consolidation: the episode monitor groups live
//! traffic into windows and promotes the interesting ones to episodes; the
//! summarizer writes periodic per-chat rollups.

pub mod monitor;
pub mod summarizer;

pub use monitor::EpisodeMonitor;
pub use summarizer::ChatSummarizer;
