//! Fact extraction: turns noisy conversation windows into typed,
//! confidence-scored candidates for the fact store.
//!
//! Two tiers: a rule-based lexical pass (high precision, low recall) and a
//! guarded LLM pass used only when the rules come up short on an active
//! window. Extraction failures are logged and swallowed; they never fail
//! the turn that scheduled them.

pub mod extractor;
pub mod llm_pass;
pub mod rules;

pub use extractor::FactExtractor;
