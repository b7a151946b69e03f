//! The turn orchestrator: one inbound message in, at most one reply out.
//!
//! Channel adapters stay thin; everything between the ingress filter and
//! the outbound send lives here, behind the `BotContext` trait.

pub mod addressed;
pub mod context;
pub mod locks;
pub mod sanitize;
pub mod tools;
pub mod turn;

pub use addressed::TriggerMatcher;
pub use context::BotContext;
pub use locks::TurnLocks;
pub use turn::{process_turn, TurnOutcome};
