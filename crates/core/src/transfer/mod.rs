//! Transfer Broker.
//!
//! Moves coins between a student's discipline accounts when separation mode
//! is on, and routes purchases to the right account(s) in either mode.

pub mod broker;
pub mod types;

pub use broker::TransferBroker;
pub use types::{SpendReceipt, SpendRequest, TransferReceipt, TransferRequest};
