use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db::models::{
    Invoice, NewAssetTransaction, NewFeeTransaction, NewPayment, Payment, PaymentType, SenderInfo,
    TxDirection,
};
use crate::error::{daemon_error_detail, AppError};
use crate::ports::daemon::DaemonClient;
use crate::ports::notify::NotificationSink;
use crate::ports::store::LedgerStore;
use crate::services::preimage::PreimageCache;

/// Machine-readable settlement result tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Completed,
    AlreadyPaid,
    PaidTxFailed,
    ValidationFailed,
    Error,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Completed => "completed",
            SettlementStatus::AlreadyPaid => "already_paid",
            SettlementStatus::PaidTxFailed => "paid_tx_failed",
            SettlementStatus::ValidationFailed => "validation_failed",
            SettlementStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub success: bool,
    pub status: SettlementStatus,
    pub already_settled: bool,
    /// The invoice is paid but ledger recording failed; a later sweep
    /// or manual path must finish the bookkeeping.
    pub partial: bool,
    pub invoice: Option<Invoice>,
    pub preimage: Option<String>,
    pub detail: Option<String>,
}

impl SettlementOutcome {
    fn completed(invoice: Invoice, preimage: String) -> Self {
        SettlementOutcome {
            success: true,
            status: SettlementStatus::Completed,
            already_settled: false,
            partial: false,
            invoice: Some(invoice),
            preimage: Some(preimage),
            detail: None,
        }
    }

    fn already(invoice: Option<Invoice>) -> Self {
        SettlementOutcome {
            success: true,
            status: SettlementStatus::AlreadyPaid,
            already_settled: true,
            partial: false,
            invoice,
            preimage: None,
            detail: None,
        }
    }

    fn partial(invoice: Invoice, preimage: String, detail: String) -> Self {
        SettlementOutcome {
            success: true,
            status: SettlementStatus::PaidTxFailed,
            already_settled: false,
            partial: true,
            invoice: Some(invoice),
            preimage: Some(preimage),
            detail: Some(detail),
        }
    }

    fn validation_failed(detail: impl Into<String>) -> Self {
        SettlementOutcome {
            success: false,
            status: SettlementStatus::ValidationFailed,
            already_settled: false,
            partial: false,
            invoice: None,
            preimage: None,
            detail: Some(detail.into()),
        }
    }

    fn failed(detail: String) -> Self {
        SettlementOutcome {
            success: false,
            status: SettlementStatus::Error,
            already_settled: false,
            partial: false,
            invoice: None,
            preimage: None,
            detail: Some(detail),
        }
    }
}

/// Recently settled payment hashes. Bounded by both a time window and
/// a capacity cap so a long-lived process cannot grow it without
/// limit; the durable dedup check is the invoice status in the store.
pub struct SettledCache {
    window: Duration,
    capacity: usize,
    entries: HashMap<String, Instant>,
}

impl SettledCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        SettledCache {
            window,
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, payment_hash: &str) -> bool {
        match self.entries.get(payment_hash) {
            Some(at) => at.elapsed() < self.window,
            None => false,
        }
    }

    pub fn insert(&mut self, payment_hash: &str) {
        self.prune();
        if self.entries.len() >= self.capacity {
            // Evict the stalest entry; the store still guards against
            // double settlement for anything evicted early.
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(payment_hash.to_string(), Instant::now());
    }

    fn prune(&mut self) {
        let window = self.window;
        self.entries.retain(|_, at| at.elapsed() < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct RecordPaymentArgs {
    pub payment_hash: String,
    pub payment_request: String,
    pub asset_id: String,
    pub asset_amount: i64,
    pub fee_sats: i64,
    pub memo: Option<String>,
    pub user_id: String,
    pub wallet_id: String,
    pub preimage: Option<String>,
}

/// Settles asset invoices: releases the HODL invoice on the daemon for
/// external payments, flips the invoice row, and records the ledger
/// legs. Every dependency is injected; there is no global state.
pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    daemon: Arc<dyn DaemonClient>,
    notifier: Arc<dyn NotificationSink>,
    preimages: Arc<PreimageCache>,
    settled: Mutex<SettledCache>,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        daemon: Arc<dyn DaemonClient>,
        notifier: Arc<dyn NotificationSink>,
        preimages: Arc<PreimageCache>,
        settled_window: Duration,
        settled_capacity: usize,
    ) -> Self {
        SettlementService {
            store,
            daemon,
            notifier,
            preimages,
            settled: Mutex::new(SettledCache::new(settled_window, settled_capacity)),
        }
    }

    /// Settles the invoice identified by `payment_hash`. Never returns
    /// `Err`; every failure mode is folded into the outcome so callers
    /// (monitor tasks in particular) get a uniform report.
    pub async fn settle_invoice(
        &self,
        payment_hash: &str,
        classification: PaymentType,
        sender: Option<SenderInfo>,
    ) -> SettlementOutcome {
        match self
            .settle_inner(payment_hash, classification, sender)
            .await
        {
            Ok(outcome) => outcome,
            Err(AppError::Daemon(e)) => {
                let detail = daemon_error_detail(&e);
                error!(payment_hash, error = %e, "daemon refused settlement");
                SettlementOutcome::failed(detail)
            }
            Err(e) => {
                error!(payment_hash, error = %e, "settlement failed");
                SettlementOutcome::failed(e.to_string())
            }
        }
    }

    async fn settle_inner(
        &self,
        payment_hash: &str,
        classification: PaymentType,
        sender: Option<SenderInfo>,
    ) -> Result<SettlementOutcome, AppError> {
        // Fast path: recently settled by this process.
        {
            let settled = self.settled.lock().await;
            if settled.contains(payment_hash) {
                debug!(payment_hash, "hash in settled cache, skipping");
                return Ok(SettlementOutcome::already(None));
            }
        }

        let invoice = match self.store.get_invoice_by_hash(payment_hash).await? {
            Some(inv) => inv,
            None => {
                return Ok(SettlementOutcome::validation_failed(format!(
                    "no invoice found for payment hash {payment_hash}"
                )))
            }
        };

        if invoice.is_paid() {
            debug!(payment_hash, "invoice already paid in store");
            self.settled.lock().await.insert(payment_hash);
            return Ok(SettlementOutcome::already(Some(invoice)));
        }

        let preimage_hex = self.preimages.get_or_generate(payment_hash).await;

        if classification == PaymentType::External {
            let preimage = decode_preimage(&preimage_hex)?;
            match self.daemon.settle_hodl_invoice(preimage).await {
                Ok(()) => {
                    info!(payment_hash, "hodl invoice settled on daemon");
                }
                Err(e) if e.is_already_settled() => {
                    info!(payment_hash, "daemon reports invoice already settled");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Serialization point: the conditional pending -> paid flip.
        // Exactly one caller per hash gets a row back.
        let mut tx = self.store.begin().await?;
        let flipped = tx.mark_invoice_paid(invoice.id).await?;
        tx.commit().await?;

        let updated = match flipped {
            Some(inv) => inv,
            None => {
                // Someone else won the race (or an operator moved the
                // invoice out of pending).
                let current = self.store.get_invoice_by_hash(payment_hash).await?;
                return match current {
                    Some(inv) if inv.is_paid() => {
                        self.settled.lock().await.insert(payment_hash);
                        Ok(SettlementOutcome::already(Some(inv)))
                    }
                    Some(inv) => Ok(SettlementOutcome::failed(format!(
                        "invoice is {} and cannot be settled",
                        inv.status
                    ))),
                    None => Ok(SettlementOutcome::failed(
                        "invoice disappeared during settlement".to_string(),
                    )),
                };
            }
        };

        // Both ledger legs share one transaction; an internal transfer
        // either moves the balance on both sides or on neither.
        if let Err(e) = self.record_legs(&updated, sender.as_ref()).await {
            warn!(payment_hash, error = %e, "invoice paid but ledger recording failed");
            self.settled.lock().await.insert(payment_hash);
            return Ok(SettlementOutcome::partial(
                updated,
                preimage_hex,
                format!("ledger recording failed: {e}"),
            ));
        }

        self.settled.lock().await.insert(payment_hash);
        self.notify_settlement(&updated, sender.as_ref()).await;

        info!(
            payment_hash,
            asset_id = %updated.asset_id,
            amount = updated.asset_amount,
            ?classification,
            "settlement completed"
        );
        Ok(SettlementOutcome::completed(updated, preimage_hex))
    }

    async fn record_legs(
        &self,
        invoice: &Invoice,
        sender: Option<&SenderInfo>,
    ) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;

        let credit = tx
            .record_asset_transaction(NewAssetTransaction {
                wallet_id: invoice.wallet_id.clone(),
                asset_id: invoice.asset_id.clone(),
                payment_hash: Some(invoice.payment_hash.clone()),
                amount: invoice.asset_amount,
                fee: 0,
                memo: invoice.memo.clone(),
                direction: TxDirection::Credit,
            })
            .await;

        if let Err(e) = credit {
            let _ = tx.rollback().await;
            return Err(e);
        }

        if let Some(sender) = sender {
            let debit = tx
                .record_asset_transaction(NewAssetTransaction {
                    wallet_id: sender.wallet_id.clone(),
                    asset_id: invoice.asset_id.clone(),
                    payment_hash: Some(invoice.payment_hash.clone()),
                    amount: invoice.asset_amount,
                    fee: 0,
                    memo: invoice.memo.clone(),
                    direction: TxDirection::Debit,
                })
                .await;

            if let Err(e) = debit {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        tx.commit().await
    }

    /// Records an outbound payment. `record_debit` is true for routed
    /// (external) payments; internal payments already debited the payer
    /// inside the settlement transaction.
    pub async fn record_payment(
        &self,
        args: RecordPaymentArgs,
        record_debit: bool,
    ) -> Result<Payment, AppError> {
        let mut tx = self.store.begin().await?;

        let payment = match tx
            .create_payment_record(NewPayment {
                payment_hash: args.payment_hash.clone(),
                payment_request: args.payment_request.clone(),
                asset_id: args.asset_id.clone(),
                asset_amount: args.asset_amount,
                fee_sats: args.fee_sats,
                memo: args.memo.clone(),
                user_id: args.user_id.clone(),
                wallet_id: args.wallet_id.clone(),
                preimage: args.preimage.clone(),
            })
            .await
        {
            Ok(p) => p,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        };

        if record_debit {
            let debit = tx
                .record_asset_transaction(NewAssetTransaction {
                    wallet_id: args.wallet_id.clone(),
                    asset_id: args.asset_id.clone(),
                    payment_hash: Some(args.payment_hash.clone()),
                    amount: args.asset_amount,
                    fee: args.fee_sats,
                    memo: args.memo.clone(),
                    direction: TxDirection::Debit,
                })
                .await;
            if let Err(e) = debit {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        if args.fee_sats > 0 {
            let fee = tx
                .create_fee_transaction(NewFeeTransaction {
                    user_id: args.user_id.clone(),
                    wallet_id: args.wallet_id.clone(),
                    asset_payment_hash: args.payment_hash.clone(),
                    fee_amount_msat: args.fee_sats * 1000,
                    status: "settled".to_string(),
                })
                .await;
            if let Err(e) = fee {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        tx.commit().await?;

        self.notify_payment(&payment).await;
        Ok(payment)
    }

    async fn notify_settlement(&self, invoice: &Invoice, sender: Option<&SenderInfo>) {
        let payload = match serde_json::to_value(invoice) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize invoice notification");
                return;
            }
        };

        if let Err(e) = self
            .notifier
            .notify_invoice_update(&invoice.user_id, payload)
            .await
        {
            warn!(error = %e, "invoice notification failed");
        }

        self.notify_assets(&invoice.user_id, &invoice.wallet_id).await;
        if let Some(sender) = sender {
            self.notify_assets(&sender.user_id, &sender.wallet_id).await;
        }
    }

    async fn notify_payment(&self, payment: &Payment) {
        match serde_json::to_value(payment) {
            Ok(payload) => {
                if let Err(e) = self
                    .notifier
                    .notify_payment_update(&payment.user_id, payload)
                    .await
                {
                    warn!(error = %e, "payment notification failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize payment notification"),
        }
        self.notify_assets(&payment.user_id, &payment.wallet_id).await;
    }

    /// Pushes a refreshed per-asset balance snapshot, merging the
    /// daemon's channel view with the user's ledger balances.
    async fn notify_assets(&self, user_id: &str, wallet_id: &str) {
        let balances = match self.store.wallet_balances(wallet_id).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "could not load balances for snapshot");
                return;
            }
        };

        let channel_assets = match self.daemon.list_assets().await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "could not list channel assets for snapshot");
                Vec::new()
            }
        };

        let snapshot: Vec<_> = balances
            .iter()
            .map(|b| {
                let channel = channel_assets.iter().find(|a| a.asset_id == b.asset_id);
                json!({
                    "asset_id": b.asset_id,
                    "name": channel.map(|a| a.name.clone()).unwrap_or_default(),
                    "channel_capacity": channel.map(|a| a.amount).unwrap_or(0),
                    "user_balance": b.balance,
                })
            })
            .collect();

        if let Err(e) = self
            .notifier
            .notify_assets_update(user_id, json!(snapshot))
            .await
        {
            warn!(error = %e, "assets notification failed");
        }
    }
}

fn decode_preimage(hex_str: &str) -> Result<[u8; 32], AppError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| AppError::Internal(format!("malformed cached preimage: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| AppError::Internal("cached preimage is not 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_cache_respects_capacity() {
        let mut cache = SettledCache::new(Duration::from_secs(3600), 3);
        for i in 0..5 {
            cache.insert(&format!("h{i}"));
        }
        assert!(cache.len() <= 3);
        // The newest entry always survives.
        assert!(cache.contains("h4"));
    }

    #[tokio::test(start_paused = true)]
    async fn settled_cache_expires_by_window() {
        let mut cache = SettledCache::new(Duration::from_secs(10), 100);
        cache.insert("h1");
        assert!(cache.contains("h1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!cache.contains("h1"));

        cache.insert("h2");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn decode_preimage_rejects_bad_input() {
        assert!(decode_preimage("zz").is_err());
        assert!(decode_preimage("ab").is_err());
        assert!(decode_preimage(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn status_tags() {
        assert_eq!(SettlementStatus::Completed.as_str(), "completed");
        assert_eq!(SettlementStatus::AlreadyPaid.as_str(), "already_paid");
        assert_eq!(SettlementStatus::PaidTxFailed.as_str(), "paid_tx_failed");
    }
}
