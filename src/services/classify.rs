use tracing::debug;

use crate::db::models::PaymentType;
use crate::error::AppError;
use crate::ports::store::LedgerStore;

/// Decides how a payment should be routed: if the payment hash matches
/// an invoice we issued, the transfer never leaves the ledger. A store
/// read failure aborts the call; guessing external on a degraded
/// database could double-spend channel liquidity.
pub async fn classify_payment(
    store: &dyn LedgerStore,
    payment_hash: &str,
    acting_user_id: &str,
) -> Result<PaymentType, AppError> {
    let invoice = store.get_invoice_by_hash(payment_hash).await?;

    let classification = match invoice {
        None => PaymentType::External,
        Some(inv) if inv.user_id == acting_user_id => PaymentType::SelfPayment,
        Some(_) => PaymentType::Internal,
    };

    debug!(payment_hash, ?classification, "classified payment");
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryLedgerStore;
    use crate::db::models::NewInvoice;

    async fn seed_invoice(store: &MemoryLedgerStore, hash: &str, user: &str) {
        store
            .create_invoice(NewInvoice {
                payment_hash: hash.to_string(),
                payment_request: "lnbc1test".to_string(),
                asset_id: "aa".repeat(32),
                asset_amount: 10,
                satoshi_amount: 1,
                memo: None,
                user_id: user.to_string(),
                wallet_id: format!("{user}-wallet"),
                expires_at: None,
                buy_quote: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_hash_is_external() {
        let store = MemoryLedgerStore::new();
        let t = classify_payment(&store, "nope", "u1").await.unwrap();
        assert_eq!(t, PaymentType::External);
    }

    #[tokio::test]
    async fn own_invoice_is_self_payment() {
        let store = MemoryLedgerStore::new();
        seed_invoice(&store, "h1", "u1").await;
        let t = classify_payment(&store, "h1", "u1").await.unwrap();
        assert_eq!(t, PaymentType::SelfPayment);
    }

    #[tokio::test]
    async fn other_users_invoice_is_internal() {
        let store = MemoryLedgerStore::new();
        seed_invoice(&store, "h1", "u2").await;
        let t = classify_payment(&store, "h1", "u1").await.unwrap();
        assert_eq!(t, PaymentType::Internal);
    }
}
