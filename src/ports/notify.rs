use async_trait::async_trait;

use crate::error::AppError;

/// Best-effort push of state changes toward connected clients.
/// Callers log and swallow failures; a lost notification never fails
/// a settlement.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_invoice_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError>;

    async fn notify_payment_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError>;

    async fn notify_assets_update(
        &self,
        user_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), AppError>;
}
