//! In-process notification fan-out over a tokio broadcast channel.

use tokio::sync::broadcast;

use super::event::{NotificationEvent, NotificationSink, NotifyError};

/// Publishes events to every current subscriber.
///
/// Having no subscribers is not a failure; slow subscribers lag and lose the
/// oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotifier {
    /// Creates a notifier buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn publish(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        // send only fails when nobody is listening
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::event::{NotificationKind, Recipient};
    use chrono::Utc;
    use moeda_shared::types::StudentId;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let event = NotificationEvent::new(
            NotificationKind::CoinsExpired,
            vec![Recipient::Student(StudentId::new())],
            serde_json::json!({"amount": 5}),
            Utc::now(),
        );

        notifier.publish(&event).unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new(8);
        let event = NotificationEvent::new(
            NotificationKind::BalanceAdjusted,
            vec![],
            serde_json::Value::Null,
            Utc::now(),
        );
        assert!(notifier.publish(&event).is_ok());
    }
}
