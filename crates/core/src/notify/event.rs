//! Notification events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use moeda_shared::types::StudentId;

use crate::audit::StaffRole;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A lot entered its notice window.
    LotNearingExpiry,
    /// A lot expired and its coins were removed.
    CoinsExpired,
    /// Staff adjusted a balance by hand.
    BalanceAdjusted,
    /// Staff cancelled a purchase.
    PurchaseCancelled,
}

/// Who should hear about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// One student.
    Student(StudentId),
    /// Every staff member holding a role.
    Role(StaffRole),
}

/// Fire-and-forget message for the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event id, stable across redeliveries.
    pub id: Uuid,
    /// Event category.
    pub kind: NotificationKind,
    /// Recipients.
    pub recipients: Vec<Recipient>,
    /// Kind-specific details.
    pub payload: serde_json::Value,
    /// When the event was produced.
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Creates an event with a fresh id.
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        recipients: Vec<Recipient>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            recipients,
            payload,
            created_at,
        }
    }
}

/// Notification publishing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The sink no longer accepts events.
    #[error("Notification sink closed")]
    Closed,

    /// The sink refused the event.
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Where notification events go.
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Publishes one event.
    fn publish(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}
