use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::{
    AssetBalance, AssetTransaction, Invoice, NewAssetTransaction, NewFeeTransaction, NewInvoice,
    NewPayment, Payment,
};
use crate::error::AppError;

/// Durable entity storage. Reads go through the store directly;
/// writes that must be atomic go through a [`LedgerTx`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a scoped transaction. Implementations retry transient
    /// contention with a bounded count before giving up.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError>;

    async fn create_invoice(&self, new: NewInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn get_invoice_by_hash(&self, payment_hash: &str) -> Result<Option<Invoice>, AppError>;

    async fn user_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, AppError>;

    async fn user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError>;

    async fn asset_balance(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Option<AssetBalance>, AppError>;

    async fn wallet_balances(&self, wallet_id: &str) -> Result<Vec<AssetBalance>, AppError>;

    async fn asset_transactions(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Vec<AssetTransaction>, AppError>;
}

/// A scoped write transaction. Dropping without `commit` rolls back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Conditionally flips a pending invoice to paid and stamps
    /// `paid_at`. Returns `None` when the invoice was not pending,
    /// which makes this the per-hash serialization point.
    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Moves a pending invoice to a terminal status. Returns `None`
    /// when the invoice was not pending; paid invoices can never be
    /// reopened or overwritten.
    async fn update_invoice_status(
        &mut self,
        id: Uuid,
        status: &str,
    ) -> Result<Option<Invoice>, AppError>;

    /// Inserts a ledger entry and applies its signed delta to the
    /// matching balance row in the same transaction.
    async fn record_asset_transaction(
        &mut self,
        new: NewAssetTransaction,
    ) -> Result<AssetTransaction, AppError>;

    async fn create_payment_record(&mut self, new: NewPayment) -> Result<Payment, AppError>;

    async fn create_fee_transaction(
        &mut self,
        new: NewFeeTransaction,
    ) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
