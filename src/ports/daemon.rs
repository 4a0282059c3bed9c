use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;

use crate::error::DaemonError;

/// Custom HTLC record carrying the asset transfer payload.
pub const ASSET_TRANSFER_RECORD_TYPE: u64 = 65543;

pub type EventStream<T> = BoxStream<'static, Result<T, DaemonError>>;

#[derive(Debug, Clone)]
pub struct AssetInvoiceRequest {
    pub asset_id: String,
    pub asset_amount: u64,
    pub memo: String,
    pub expiry_secs: Option<u64>,
    pub payment_hash: [u8; 32],
    pub peer_pubkey: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddedInvoice {
    pub payment_request: String,
    /// RFQ quote the daemon locked in for this invoice, if any.
    pub buy_quote: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RoutePaymentRequest {
    pub payment_request: String,
    pub asset_id: String,
    pub fee_limit_sats: i64,
    pub peer_pubkey: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoutedPayment {
    pub payment_hash: String,
    pub preimage: String,
    pub fee_msat: i64,
}

/// lnd invoice state machine values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

#[derive(Debug, Clone, Default)]
pub struct HtlcRecord {
    pub custom_records: HashMap<u64, Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct InvoiceUpdate {
    pub state: InvoiceState,
    pub htlcs: Vec<HtlcRecord>,
}

/// Asset transfer event from the daemon's send stream. Informational
/// only; settlement is driven by invoice-state subscriptions.
#[derive(Debug, Clone)]
pub struct SendEvent {
    pub state: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelAsset {
    pub asset_id: String,
    pub name: String,
    pub amount: i64,
    pub channel_info: Option<serde_json::Value>,
    pub user_balance: i64,
}

/// RPC boundary to the asset daemon (tapd + lnd). Wire transport is an
/// implementation concern of the host application.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    async fn add_hodl_invoice(
        &self,
        req: AssetInvoiceRequest,
    ) -> Result<AddedInvoice, DaemonError>;

    async fn settle_hodl_invoice(&self, preimage: [u8; 32]) -> Result<(), DaemonError>;

    async fn route_payment(
        &self,
        req: RoutePaymentRequest,
    ) -> Result<RoutedPayment, DaemonError>;

    async fn subscribe_invoice_state(
        &self,
        payment_hash: [u8; 32],
    ) -> Result<EventStream<InvoiceUpdate>, DaemonError>;

    async fn subscribe_send_events(&self) -> Result<EventStream<SendEvent>, DaemonError>;

    async fn list_assets(&self) -> Result<Vec<ChannelAsset>, DaemonError>;
}
