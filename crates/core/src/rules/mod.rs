//! Distribution Rules Engine.
//!
//! Turns qualifying student events into coin awards, applying the active
//! distribution rule and the per-student period cap.

pub mod engine;
pub mod types;

pub use engine::RulesEngine;
pub use types::{AwardOutcome, AwardRecord, AwardRequest, CapExceededNotice};
