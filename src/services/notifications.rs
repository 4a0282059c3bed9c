use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::AppError;
use crate::ports::notify::NotificationSink;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotification {
    pub user_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Fans notifications out over a broadcast channel; the host
/// application bridges receivers to its websocket (or other) layer.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<UserNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        BroadcastNotifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserNotification> {
        self.tx.subscribe()
    }

    fn send(&self, user_id: &str, kind: &str, payload: serde_json::Value) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(UserNotification {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            payload,
        });
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn notify_invoice_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        self.send(user_id, "invoice_update", payload);
        Ok(())
    }

    async fn notify_payment_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        self.send(user_id, "payment_update", payload);
        Ok(())
    }

    async fn notify_assets_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        self.send(user_id, "assets_update", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let notifier = BroadcastNotifier::new(16);
        let mut rx = notifier.subscribe();

        notifier
            .notify_invoice_update("u1", json!({"status": "paid"}))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.kind, "invoice_update");
        assert_eq!(msg.payload["status"], "paid");
    }

    #[tokio::test]
    async fn no_subscribers_is_not_an_error() {
        let notifier = BroadcastNotifier::new(16);
        notifier
            .notify_assets_update("u1", json!([]))
            .await
            .unwrap();
    }
}
