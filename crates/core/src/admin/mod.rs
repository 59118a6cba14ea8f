//! Admin Override & Audit.
//!
//! Manual credits, debits and purchase cancellations by staff. Each one is
//! a regular ledger mutation followed by an audit entry and a notification,
//! both best-effort.

pub mod service;
pub mod types;

pub use service::AdminService;
pub use types::{AdjustRequest, AdminOutcome, CancelRequest, SideEffectReport};
