use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an asset invoice. Stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvoiceStatus::Pending),
            "paid" => Some(InvoiceStatus::Paid),
            "expired" => Some(InvoiceStatus::Expired),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub payment_hash: String,
    pub payment_request: String,
    pub asset_id: String,
    pub asset_amount: i64,
    pub satoshi_amount: i64,
    pub memo: Option<String>,
    pub status: String,
    pub user_id: String,
    pub wallet_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub buy_quote: Option<serde_json::Value>,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid.as_str()
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvoiceStatus::Pending.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub payment_hash: String,
    pub payment_request: String,
    pub asset_id: String,
    pub asset_amount: i64,
    pub satoshi_amount: i64,
    pub memo: Option<String>,
    pub user_id: String,
    pub wallet_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub buy_quote: Option<serde_json::Value>,
}

/// Outbound payment record. Append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub payment_hash: String,
    pub payment_request: String,
    pub asset_id: String,
    pub asset_amount: i64,
    pub fee_sats: i64,
    pub memo: Option<String>,
    pub status: String,
    pub user_id: String,
    pub wallet_id: String,
    pub created_at: DateTime<Utc>,
    pub preimage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
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

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssetBalance {
    pub id: Uuid,
    pub wallet_id: String,
    pub asset_id: String,
    pub balance: i64,
    pub last_payment_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    Credit,
    Debit,
}

impl TxDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxDirection::Credit => "credit",
            TxDirection::Debit => "debit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssetTransaction {
    pub id: Uuid,
    pub wallet_id: String,
    pub asset_id: String,
    pub payment_hash: Option<String>,
    pub amount: i64,
    pub fee: i64,
    pub memo: Option<String>,
    pub tx_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAssetTransaction {
    pub wallet_id: String,
    pub asset_id: String,
    pub payment_hash: Option<String>,
    pub amount: i64,
    pub fee: i64,
    pub memo: Option<String>,
    pub direction: TxDirection,
}

/// Node-level satoshi fee charged alongside an asset payment (msat).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeeTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub wallet_id: String,
    pub asset_payment_hash: String,
    pub fee_amount_msat: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeeTransaction {
    pub user_id: String,
    pub wallet_id: String,
    pub asset_payment_hash: String,
    pub fee_amount_msat: i64,
    pub status: String,
}

/// Identifies the paying side of an internal transfer.
#[derive(Debug, Clone)]
pub struct SenderInfo {
    pub user_id: String,
    pub wallet_id: String,
}

/// How a payment should be routed relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// Invoice issued elsewhere; routed over lightning.
    External,
    /// Invoice issued by another local user; settled in the ledger.
    Internal,
    /// Invoice issued by the paying user themselves.
    SelfPayment,
}
