use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::models::{
    AssetBalance, AssetTransaction, FeeTransaction, Invoice, NewAssetTransaction,
    NewFeeTransaction, NewInvoice, NewPayment, Payment, TxDirection,
};
use crate::error::AppError;
use crate::ports::store::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct MemState {
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    balances: HashMap<(String, String), AssetBalance>,
    transactions: Vec<AssetTransaction>,
    fees: Vec<FeeTransaction>,
}

/// In-memory ledger store for tests and local development. A single
/// mutex serializes transactions, giving the same per-hash
/// serialization guarantees as the conditional SQL update.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: count ledger entries touching a payment hash.
    pub async fn transactions_for_hash(&self, payment_hash: &str) -> Vec<AssetTransaction> {
        let state = self.state.lock().await;
        state
            .transactions
            .iter()
            .filter(|t| t.payment_hash.as_deref() == Some(payment_hash))
            .cloned()
            .collect()
    }

    /// Test helper: all recorded fee transactions.
    pub async fn fee_transactions(&self) -> Vec<FeeTransaction> {
        self.state.lock().await.fees.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTx { guard, staged }))
    }

    async fn create_invoice(&self, new: NewInvoice) -> Result<Invoice, AppError> {
        let mut state = self.state.lock().await;
        if state.invoices.iter().any(|i| i.payment_hash == new.payment_hash) {
            return Err(AppError::Store(format!(
                "duplicate payment hash {}",
                new.payment_hash
            )));
        }
        let invoice = Invoice {
            id: Uuid::new_v4(),
            payment_hash: new.payment_hash,
            payment_request: new.payment_request,
            asset_id: new.asset_id,
            asset_amount: new.asset_amount,
            satoshi_amount: new.satoshi_amount,
            memo: new.memo,
            status: "pending".to_string(),
            user_id: new.user_id,
            wallet_id: new.wallet_id,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            paid_at: None,
            buy_quote: new.buy_quote,
        };
        state.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state.invoices.iter().find(|i| i.id == id).cloned())
    }

    async fn get_invoice_by_hash(&self, payment_hash: &str) -> Result<Option<Invoice>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.payment_hash == payment_hash)
            .cloned())
    }

    async fn user_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state
            .invoices
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn asset_balance(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Option<AssetBalance>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&(wallet_id.to_string(), asset_id.to_string()))
            .cloned())
    }

    async fn wallet_balances(&self, wallet_id: &str) -> Result<Vec<AssetBalance>, AppError> {
        let state = self.state.lock().await;
        let mut balances: Vec<_> = state
            .balances
            .values()
            .filter(|b| b.wallet_id == wallet_id)
            .cloned()
            .collect();
        balances.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        Ok(balances)
    }

    async fn asset_transactions(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Vec<AssetTransaction>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id && t.asset_id == asset_id)
            .cloned()
            .collect())
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

#[async_trait]
impl LedgerTx for MemTx {
    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice = self
            .staged
            .invoices
            .iter_mut()
            .find(|i| i.id == id && i.status == "pending");
        match invoice {
            Some(inv) => {
                inv.status = "paid".to_string();
                inv.paid_at = Some(Utc::now());
                Ok(Some(inv.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_invoice_status(
        &mut self,
        id: Uuid,
        status: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = self
            .staged
            .invoices
            .iter_mut()
            .find(|i| i.id == id && i.status == "pending");
        match invoice {
            Some(inv) => {
                inv.status = status.to_string();
                Ok(Some(inv.clone()))
            }
            None => Ok(None),
        }
    }

    async fn record_asset_transaction(
        &mut self,
        new: NewAssetTransaction,
    ) -> Result<AssetTransaction, AppError> {
        let tx_row = AssetTransaction {
            id: Uuid::new_v4(),
            wallet_id: new.wallet_id.clone(),
            asset_id: new.asset_id.clone(),
            payment_hash: new.payment_hash.clone(),
            amount: new.amount,
            fee: new.fee,
            memo: new.memo,
            tx_type: new.direction.as_str().to_string(),
            created_at: Utc::now(),
        };
        self.staged.transactions.push(tx_row.clone());

        let delta = match new.direction {
            TxDirection::Credit => new.amount,
            TxDirection::Debit => -new.amount,
        };
        let key = (new.wallet_id.clone(), new.asset_id.clone());
        let entry = self.staged.balances.entry(key).or_insert_with(|| AssetBalance {
            id: Uuid::new_v4(),
            wallet_id: new.wallet_id.clone(),
            asset_id: new.asset_id.clone(),
            balance: 0,
            last_payment_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        entry.balance += delta;
        entry.last_payment_hash = new.payment_hash;
        entry.updated_at = Utc::now();

        Ok(tx_row)
    }

    async fn create_payment_record(&mut self, new: NewPayment) -> Result<Payment, AppError> {
        let payment = Payment {
            id: Uuid::new_v4(),
            payment_hash: new.payment_hash,
            payment_request: new.payment_request,
            asset_id: new.asset_id,
            asset_amount: new.asset_amount,
            fee_sats: new.fee_sats,
            memo: new.memo,
            status: "completed".to_string(),
            user_id: new.user_id,
            wallet_id: new.wallet_id,
            created_at: Utc::now(),
            preimage: new.preimage,
        };
        self.staged.payments.push(payment.clone());
        Ok(payment)
    }

    async fn create_fee_transaction(&mut self, new: NewFeeTransaction) -> Result<(), AppError> {
        self.staged.fees.push(FeeTransaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            wallet_id: new.wallet_id,
            asset_payment_hash: new.asset_payment_hash,
            fee_amount_msat: new.fee_amount_msat,
            status: new.status,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        *self.guard = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_fixture(hash: &str, user: &str, wallet: &str) -> NewInvoice {
        NewInvoice {
            payment_hash: hash.to_string(),
            payment_request: format!("lnbc1{hash}"),
            asset_id: "aa".repeat(32),
            asset_amount: 100,
            satoshi_amount: 1,
            memo: None,
            user_id: user.to_string(),
            wallet_id: wallet.to_string(),
            expires_at: None,
            buy_quote: None,
        }
    }

    #[tokio::test]
    async fn mark_paid_is_conditional() {
        let store = MemoryLedgerStore::new();
        let inv = store
            .create_invoice(invoice_fixture("h1", "u1", "w1"))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let flipped = tx.mark_invoice_paid(inv.id).await.unwrap();
        assert!(flipped.is_some());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.mark_invoice_paid(inv.id).await.unwrap();
        assert!(second.is_none());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn paid_invoice_status_is_immutable() {
        let store = MemoryLedgerStore::new();
        let inv = store
            .create_invoice(invoice_fixture("h1", "u1", "w1"))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.mark_invoice_paid(inv.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let changed = tx.update_invoice_status(inv.id, "cancelled").await.unwrap();
        assert!(changed.is_none());
        tx.commit().await.unwrap();

        let current = store.get_invoice(inv.id).await.unwrap().unwrap();
        assert!(current.is_paid());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.record_asset_transaction(NewAssetTransaction {
            wallet_id: "w1".to_string(),
            asset_id: "a1".to_string(),
            payment_hash: Some("h1".to_string()),
            amount: 50,
            fee: 0,
            memo: None,
            direction: TxDirection::Credit,
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.asset_balance("w1", "a1").await.unwrap().is_none());
        assert!(store.transactions_for_hash("h1").await.is_empty());
    }

    #[tokio::test]
    async fn balance_tracks_signed_deltas() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        for (amount, direction) in [
            (100, TxDirection::Credit),
            (30, TxDirection::Debit),
            (5, TxDirection::Credit),
        ] {
            tx.record_asset_transaction(NewAssetTransaction {
                wallet_id: "w1".to_string(),
                asset_id: "a1".to_string(),
                payment_hash: None,
                amount,
                fee: 0,
                memo: None,
                direction,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let balance = store.asset_balance("w1", "a1").await.unwrap().unwrap();
        assert_eq!(balance.balance, 75);
    }

    #[tokio::test]
    async fn duplicate_hash_rejected() {
        let store = MemoryLedgerStore::new();
        store
            .create_invoice(invoice_fixture("h1", "u1", "w1"))
            .await
            .unwrap();
        let err = store
            .create_invoice(invoice_fixture("h1", "u2", "w2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
    }
}
