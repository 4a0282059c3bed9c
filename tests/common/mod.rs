#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use taproot_settle::adapters::memory::MemoryLedgerStore;
use taproot_settle::db::models::{
    AssetBalance, AssetTransaction, Invoice, NewAssetTransaction, NewFeeTransaction, NewInvoice,
    NewPayment, Payment,
};
use taproot_settle::error::{AppError, DaemonError, RpcCode};
use taproot_settle::ports::daemon::{
    AddedInvoice, AssetInvoiceRequest, ChannelAsset, DaemonClient, EventStream, InvoiceUpdate,
    RoutePaymentRequest, RoutedPayment, SendEvent,
};
use taproot_settle::ports::store::{LedgerStore, LedgerTx};
use taproot_settle::services::notifications::BroadcastNotifier;
use taproot_settle::services::preimage::PreimageCache;
use taproot_settle::services::settlement::SettlementService;

pub const ASSET_ID: &str = "1111111111111111111111111111111111111111111111111111111111111111";

/// Scripted daemon double. Responses are queued up front; unqueued
/// calls get benign defaults.
pub struct MockDaemon {
    pub settle_calls: AtomicUsize,
    pub route_calls: AtomicUsize,
    settle_results: Mutex<VecDeque<Result<(), DaemonError>>>,
    route_results: Mutex<VecDeque<Result<RoutedPayment, DaemonError>>>,
    invoice_updates: Mutex<Vec<InvoiceUpdate>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        MockDaemon {
            settle_calls: AtomicUsize::new(0),
            route_calls: AtomicUsize::new(0),
            settle_results: Mutex::new(VecDeque::new()),
            route_results: Mutex::new(VecDeque::new()),
            invoice_updates: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_settle_result(&self, result: Result<(), DaemonError>) {
        self.settle_results.lock().unwrap().push_back(result);
    }

    pub fn queue_route_result(&self, result: Result<RoutedPayment, DaemonError>) {
        self.route_results.lock().unwrap().push_back(result);
    }

    pub fn set_invoice_updates(&self, updates: Vec<InvoiceUpdate>) {
        *self.invoice_updates.lock().unwrap() = updates;
    }

    pub fn already_settled_error() -> DaemonError {
        DaemonError::new(RpcCode::FailedPrecondition, "invoice is already settled")
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn add_hodl_invoice(
        &self,
        req: AssetInvoiceRequest,
    ) -> Result<AddedInvoice, DaemonError> {
        Ok(AddedInvoice {
            payment_request: format!("lnbc-mock-{}", hex::encode(req.payment_hash)),
            buy_quote: Some(json!({"scid": "17592186044416", "asset_id": req.asset_id})),
        })
    }

    async fn settle_hodl_invoice(&self, _preimage: [u8; 32]) -> Result<(), DaemonError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        self.settle_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn route_payment(
        &self,
        _req: RoutePaymentRequest,
    ) -> Result<RoutedPayment, DaemonError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        self.route_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(RoutedPayment {
                    payment_hash: "ee".repeat(32),
                    preimage: "ff".repeat(32),
                    fee_msat: 5000,
                })
            })
    }

    async fn subscribe_invoice_state(
        &self,
        _payment_hash: [u8; 32],
    ) -> Result<EventStream<InvoiceUpdate>, DaemonError> {
        let updates: Vec<_> = self
            .invoice_updates
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(updates).boxed())
    }

    async fn subscribe_send_events(&self) -> Result<EventStream<SendEvent>, DaemonError> {
        Ok(stream::iter(Vec::new()).boxed())
    }

    async fn list_assets(&self) -> Result<Vec<ChannelAsset>, DaemonError> {
        Ok(vec![ChannelAsset {
            asset_id: ASSET_ID.to_string(),
            name: "testcoin".to_string(),
            amount: 100_000,
            channel_info: None,
            user_balance: 0,
        }])
    }
}

/// Store wrapper that injects a failure into ledger recording while
/// letting everything else through.
pub struct FlakyStore {
    pub inner: MemoryLedgerStore,
    pub fail_records: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryLedgerStore) -> Self {
        FlakyStore {
            inner,
            fail_records: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, AppError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTx {
            inner,
            fail_records: Arc::clone(&self.fail_records),
        }))
    }

    async fn create_invoice(&self, new: NewInvoice) -> Result<Invoice, AppError> {
        self.inner.create_invoice(new).await
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice(id).await
    }

    async fn get_invoice_by_hash(&self, payment_hash: &str) -> Result<Option<Invoice>, AppError> {
        self.inner.get_invoice_by_hash(payment_hash).await
    }

    async fn user_invoices(&self, user_id: &str) -> Result<Vec<Invoice>, AppError> {
        self.inner.user_invoices(user_id).await
    }

    async fn user_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        self.inner.user_payments(user_id).await
    }

    async fn asset_balance(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Option<AssetBalance>, AppError> {
        self.inner.asset_balance(wallet_id, asset_id).await
    }

    async fn wallet_balances(&self, wallet_id: &str) -> Result<Vec<AssetBalance>, AppError> {
        self.inner.wallet_balances(wallet_id).await
    }

    async fn asset_transactions(
        &self,
        wallet_id: &str,
        asset_id: &str,
    ) -> Result<Vec<AssetTransaction>, AppError> {
        self.inner.asset_transactions(wallet_id, asset_id).await
    }
}

struct FlakyTx {
    inner: Box<dyn LedgerTx>,
    fail_records: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTx for FlakyTx {
    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.inner.mark_invoice_paid(id).await
    }

    async fn update_invoice_status(
        &mut self,
        id: Uuid,
        status: &str,
    ) -> Result<Option<Invoice>, AppError> {
        self.inner.update_invoice_status(id, status).await
    }

    async fn record_asset_transaction(
        &mut self,
        new: NewAssetTransaction,
    ) -> Result<AssetTransaction, AppError> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(AppError::Store("injected recording fault".to_string()));
        }
        self.inner.record_asset_transaction(new).await
    }

    async fn create_payment_record(&mut self, new: NewPayment) -> Result<Payment, AppError> {
        self.inner.create_payment_record(new).await
    }

    async fn create_fee_transaction(&mut self, new: NewFeeTransaction) -> Result<(), AppError> {
        self.inner.create_fee_transaction(new).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.inner.rollback().await
    }
}

pub struct TestStack {
    pub store: MemoryLedgerStore,
    pub daemon: Arc<MockDaemon>,
    pub notifier: Arc<BroadcastNotifier>,
    pub preimages: Arc<PreimageCache>,
    pub settlement: Arc<SettlementService>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stack() -> TestStack {
    init_tracing();
    let raw = MemoryLedgerStore::new();
    stack_with_store(raw.clone(), raw)
}

/// `raw` and `store` must share state; `MemoryLedgerStore` clones do.
pub fn stack_with_store(
    raw: MemoryLedgerStore,
    store: impl LedgerStore + 'static,
) -> TestStack {
    let store_arc: Arc<dyn LedgerStore> = Arc::new(store);
    let daemon = Arc::new(MockDaemon::new());
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let preimages = Arc::new(PreimageCache::new(Duration::from_secs(3600)));
    let settlement = Arc::new(SettlementService::new(
        Arc::clone(&store_arc),
        daemon.clone() as Arc<dyn DaemonClient>,
        notifier.clone(),
        Arc::clone(&preimages),
        Duration::from_secs(3600),
        1024,
    ));
    TestStack {
        store: raw,
        daemon,
        notifier,
        preimages,
        settlement,
    }
}

pub async fn seed_invoice(
    store: &dyn LedgerStore,
    payment_hash: &str,
    user_id: &str,
    wallet_id: &str,
    amount: i64,
) -> Invoice {
    store
        .create_invoice(NewInvoice {
            payment_hash: payment_hash.to_string(),
            payment_request: format!("lnbc-seed-{payment_hash}"),
            asset_id: ASSET_ID.to_string(),
            asset_amount: amount,
            satoshi_amount: 1,
            memo: Some(format!(
                "Taproot Asset Transfer asset_id={ASSET_ID} amount={amount}"
            )),
            user_id: user_id.to_string(),
            wallet_id: wallet_id.to_string(),
            expires_at: None,
            buy_quote: None,
        })
        .await
        .unwrap()
}

pub async fn balance_of(store: &dyn LedgerStore, wallet_id: &str) -> i64 {
    store
        .asset_balance(wallet_id, ASSET_ID)
        .await
        .unwrap()
        .map(|b| b.balance)
        .unwrap_or(0)
}

/// Builds a real signed BOLT11 invoice around a chosen payment hash so
/// the processor's decode path runs against genuine input.
pub fn signed_invoice(payment_hash_hex: &str, description: &str) -> String {
    use bitcoin::hashes::{sha256, Hash};
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

    let hash_bytes = hex::decode(payment_hash_hex).unwrap();
    let private_key = SecretKey::from_slice(&[41; 32]).unwrap();

    InvoiceBuilder::new(Currency::Bitcoin)
        .description(description.to_string())
        .payment_hash(sha256::Hash::from_slice(&hash_bytes).unwrap())
        .payment_secret(PaymentSecret([42u8; 32]))
        .current_timestamp()
        .min_final_cltv_expiry_delta(144)
        .build_signed(|hash| Secp256k1::new().sign_ecdsa_recoverable(hash, &private_key))
        .unwrap()
        .to_string()
}

pub fn asset_description(amount: i64) -> String {
    format!("Taproot Asset Transfer asset_id={ASSET_ID} amount={amount}")
}
