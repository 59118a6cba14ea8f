//! Outbound side effects: notification events and the retry outbox.
//!
//! Delivery transport is someone else's job. This module only produces
//! [`NotificationEvent`]s, hands them to a [`NotificationSink`], and keeps
//! failed audit or notification writes around for redelivery.

pub mod broadcast;
pub mod event;
pub mod outbox;

pub use broadcast::BroadcastNotifier;
pub use event::{NotificationEvent, NotificationKind, NotificationSink, NotifyError, Recipient};
pub use outbox::{Outbox, PendingEffect};
