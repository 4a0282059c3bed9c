use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::db::models::{
    AssetBalance, AssetTransaction, Invoice, NewAssetTransaction, NewFeeTransaction, NewInvoice,
    NewPayment, Payment, TxDirection,
};
use crate::error::AppError;
use crate::ports::store::{LedgerStore, LedgerTx};

/// Postgres-backed ledger store.
pub struct PgLedgerStore {
    pool: PgPool,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        PgLedgerStore {
            pool,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError> {
        let mut attempt = 0;
        loop {
            match self.pool.begin().await {
                Ok(tx) => return Ok(Box::new(PgLedgerTx { tx })),
                Err(e) if attempt + 1 < self.retry_attempts => {
                    attempt += 1;
                    warn!(attempt, error = %e, "failed to open transaction, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn create_invoice(&self, new: NewInvoice) -> Result<Invoice, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO asset_invoices
                (id, payment_hash, payment_request, asset_id, asset_amount,
                 satoshi_amount, memo, status, user_id, wallet_id, expires_at, buy_quote)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.payment_hash)
        .bind(&new.payment_request)
        .bind(&new.asset_id)
        .bind(new.asset_amount)
        .bind(new.satoshi_amount)
        .bind(&new.memo)
        .bind(&new.user_id)
        .bind(&new.wallet_id)
        .bind(new.expires_at)
        .bind(&new.buy_quote)
        .fetch_one(&self.pool)
        .await?;

        Ok(invoice)
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM asset_invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    async fn get_invoice_by_hash(&self, payment_hash: &str) -> Result<Option<Invoice>, AppError> {
        let invoice =
            sqlx::query_as::<_, Invoice>("SELECT * FROM asset_invoices WHERE payment_hash = $1")
                .bind(payment_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(invoice)
    }

    async fn user_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM asset_invoices WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM asset_payments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn asset_balance(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Option<AssetBalance>, AppError> {
        let balance = sqlx::query_as::<_, AssetBalance>(
            "SELECT * FROM asset_balances WHERE wallet_id = $1 AND asset_id = $2",
        )
        .bind(wallet_id)
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    async fn wallet_balances(&self, wallet_id: &str) -> Result<Vec<AssetBalance>, AppError> {
        let balances = sqlx::query_as::<_, AssetBalance>(
            "SELECT * FROM asset_balances WHERE wallet_id = $1 ORDER BY asset_id",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(balances)
    }

    async fn asset_transactions(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Vec<AssetTransaction>, AppError> {
        let txs = sqlx::query_as::<_, AssetTransaction>(
            r#"
            SELECT * FROM asset_transactions
            WHERE wallet_id = $1 AND asset_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(wallet_id)
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(txs)
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE asset_invoices
            SET status = 'paid', paid_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invoice)
    }

    async fn update_invoice_status(
        &mut self,
        id: Uuid,
        status: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>(
            "UPDATE asset_invoices SET status = $2 WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(invoice)
    }

    async fn record_asset_transaction(
        &mut self,
        new: NewAssetTransaction,
    ) -> Result<AssetTransaction, AppError> {
        let tx_row = sqlx::query_as::<_, AssetTransaction>(
            r#"
            INSERT INTO asset_transactions
                (id, wallet_id, asset_id, payment_hash, amount, fee, memo, tx_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.wallet_id)
        .bind(&new.asset_id)
        .bind(&new.payment_hash)
        .bind(new.amount)
        .bind(new.fee)
        .bind(&new.memo)
        .bind(new.direction.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        let delta = match new.direction {
            TxDirection::Credit => new.amount,
            TxDirection::Debit => -new.amount,
        };

        sqlx::query(
            r#"
            INSERT INTO asset_balances
                (id, wallet_id, asset_id, balance, last_payment_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (wallet_id, asset_id) DO UPDATE
            SET balance = asset_balances.balance + EXCLUDED.balance,
                last_payment_hash = EXCLUDED.last_payment_hash,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.wallet_id)
        .bind(&new.asset_id)
        .bind(delta)
        .bind(&new.payment_hash)
        .execute(&mut *self.tx)
        .await?;

        Ok(tx_row)
    }

    async fn create_payment_record(&mut self, new: NewPayment) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO asset_payments
                (id, payment_hash, payment_request, asset_id, asset_amount,
                 fee_sats, memo, status, user_id, wallet_id, preimage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed', $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.payment_hash)
        .bind(&new.payment_request)
        .bind(&new.asset_id)
        .bind(new.asset_amount)
        .bind(new.fee_sats)
        .bind(&new.memo)
        .bind(&new.user_id)
        .bind(&new.wallet_id)
        .bind(&new.preimage)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(payment)
    }

    async fn create_fee_transaction(&mut self, new: NewFeeTransaction) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO fee_transactions
                (id, user_id, wallet_id, asset_payment_hash, fee_amount_msat, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.user_id)
        .bind(&new.wallet_id)
        .bind(&new.asset_payment_hash)
        .bind(new.fee_amount_msat)
        .bind(&new.status)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
