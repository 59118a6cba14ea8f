//! Expiration Manager.
//!
//! Moves lots through `active -> nearing_expiry -> expired`, warning owners
//! once and removing expired coins oldest first.

pub mod manager;

pub use manager::{ExpirationManager, SweepReport};
