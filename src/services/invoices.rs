use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{
    Invoice, InvoiceStatus, NewAssetTransaction, NewInvoice, Payment, TxDirection,
};
use crate::error::AppError;
use crate::monitor::TransferMonitor;
use crate::ports::daemon::{AssetInvoiceRequest, DaemonClient};
use crate::ports::notify::NotificationSink;
use crate::ports::store::LedgerStore;
use crate::services::preimage::{generate_preimage_pair, PreimageCache};

#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub asset_id: String,
    pub asset_amount: i64,
    pub memo: Option<String>,
    pub expiry_secs: Option<u64>,
    pub peer_pubkey: Option<String>,
}

/// Issues HODL invoices for incoming asset transfers and manages their
/// lifecycle afterwards.
pub struct InvoiceService {
    store: Arc<dyn LedgerStore>,
    daemon: Arc<dyn DaemonClient>,
    notifier: Arc<dyn NotificationSink>,
    preimages: Arc<PreimageCache>,
    monitor: Arc<TransferMonitor>,
    default_sat_fee: i64,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        daemon: Arc<dyn DaemonClient>,
        notifier: Arc<dyn NotificationSink>,
        preimages: Arc<PreimageCache>,
        monitor: Arc<TransferMonitor>,
        default_sat_fee: i64,
    ) -> Self {
        InvoiceService {
            store,
            daemon,
            notifier,
            preimages,
            monitor,
            default_sat_fee,
        }
    }

    /// Creates a HODL invoice: we hold the preimage, so the incoming
    /// HTLC stays pending until the settlement engine releases it.
    pub async fn create_invoice(
        &self,
        req: CreateInvoiceRequest,
        user_id: &str,
        wallet_id: &str,
    ) -> Result<Invoice, AppError> {
        validate_asset_id(&req.asset_id)?;
        if req.asset_amount <= 0 {
            return Err(AppError::Validation(
                "asset amount must be positive".to_string(),
            ));
        }

        let (preimage, payment_hash) = generate_preimage_pair();
        let hash_hex = hex::encode(payment_hash);

        self.preimages
            .insert(&hash_hex, &hex::encode(preimage))
            .await;

        let memo = req.memo.clone().unwrap_or_else(|| {
            format!(
                "Taproot Asset Transfer asset_id={} amount={}",
                req.asset_id, req.asset_amount
            )
        });

        let added = self
            .daemon
            .add_hodl_invoice(AssetInvoiceRequest {
                asset_id: req.asset_id.clone(),
                asset_amount: req.asset_amount as u64,
                memo: memo.clone(),
                expiry_secs: req.expiry_secs,
                payment_hash,
                peer_pubkey: req.peer_pubkey.clone(),
            })
            .await?;

        let expires_at = req
            .expiry_secs
            .map(|s| Utc::now() + ChronoDuration::seconds(s as i64));

        let invoice = self
            .store
            .create_invoice(NewInvoice {
                payment_hash: hash_hex.clone(),
                payment_request: added.payment_request,
                asset_id: req.asset_id,
                asset_amount: req.asset_amount,
                satoshi_amount: self.default_sat_fee,
                memo: Some(memo),
                user_id: user_id.to_string(),
                wallet_id: wallet_id.to_string(),
                expires_at,
                buy_quote: added.buy_quote,
            })
            .await?;

        info!(payment_hash = %hash_hex, asset_id = %invoice.asset_id, "hodl invoice created");

        self.monitor.spawn_watch(hash_hex);

        if let Ok(payload) = serde_json::to_value(&invoice) {
            if let Err(e) = self.notifier.notify_invoice_update(user_id, payload).await {
                warn!(error = %e, "invoice creation notification failed");
            }
        }

        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: Uuid, user_id: &str) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {id}")))?;

        if invoice.user_id != user_id {
            return Err(AppError::Unauthorized(
                "invoice belongs to another user".to_string(),
            ));
        }
        Ok(invoice)
    }

    pub async fn list_user_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, AppError> {
        self.store.user_invoices(user_id).await
    }

    pub async fn list_user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        self.store.user_payments(user_id).await
    }

    /// Operator path for moving an invoice out of pending. Marking an
    /// invoice paid here credits the recipient in the same transaction
    /// as the status flip.
    pub async fn update_invoice_status(
        &self,
        id: Uuid,
        status: &str,
    ) -> Result<Invoice, AppError> {
        let status = InvoiceStatus::parse(status)
            .ok_or_else(|| AppError::Validation(format!("unknown invoice status '{status}'")))?;
        if status == InvoiceStatus::Pending {
            return Err(AppError::Validation(
                "invoices cannot be moved back to pending".to_string(),
            ));
        }

        let invoice = self
            .store
            .get_invoice(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invoice {id}")))?;

        let mut tx = self.store.begin().await?;

        let updated = match status {
            InvoiceStatus::Paid => {
                let flipped = tx.mark_invoice_paid(id).await?;
                let Some(flipped) = flipped else {
                    let _ = tx.rollback().await;
                    return Err(AppError::Validation(
                        "only pending invoices can be marked paid".to_string(),
                    ));
                };
                tx.record_asset_transaction(NewAssetTransaction {
                    wallet_id: flipped.wallet_id.clone(),
                    asset_id: flipped.asset_id.clone(),
                    payment_hash: Some(flipped.payment_hash.clone()),
                    amount: flipped.asset_amount,
                    fee: 0,
                    memo: flipped.memo.clone(),
                    direction: TxDirection::Credit,
                })
                .await?;
                flipped
            }
            other => {
                let changed = tx.update_invoice_status(id, other.as_str()).await?;
                let Some(changed) = changed else {
                    let _ = tx.rollback().await;
                    return Err(AppError::Validation(
                        "only pending invoices can change status".to_string(),
                    ));
                };
                changed
            }
        };
        tx.commit().await?;

        info!(invoice_id = %id, status = %updated.status, "invoice status updated");

        if let Ok(payload) = serde_json::to_value(&updated) {
            if let Err(e) = self
                .notifier
                .notify_invoice_update(&invoice.user_id, payload)
                .await
            {
                warn!(error = %e, "invoice status notification failed");
            }
        }

        Ok(updated)
    }
}

fn validate_asset_id(asset_id: &str) -> Result<(), AppError> {
    if asset_id.len() != 64 || !asset_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::Validation(
            "asset id must be 64 hex characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_validation() {
        assert!(validate_asset_id(&"ab".repeat(32)).is_ok());
        assert!(validate_asset_id("abc").is_err());
        assert!(validate_asset_id(&"zz".repeat(32)).is_err());
    }
}
