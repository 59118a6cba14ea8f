//! Policy store: distribution rules, expiration and transfer policies.

pub mod error;
pub mod store;
pub mod types;

pub use error::PolicyError;
pub use store::PolicyStore;
pub use types::{
    DistributionRule, EventType, ExpirationPolicy, PolicySnapshot, TransferPolicy, MAX_GRADE,
};
