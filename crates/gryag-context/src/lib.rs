//! Retrieval and prompt assembly: the hybrid search engine fuses keyword,
//! semantic, and temporal signals; the multi-level context manager turns
//! them into a token-budgeted, five-tier prompt.

pub mod assembler;
pub mod search;

pub use assembler::{ContextAssembler, ContextSnippet, Tier};
pub use search::{HybridSearch, SearchHit};
