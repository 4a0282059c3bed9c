use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::models::{InvoiceStatus, PaymentType};
use crate::htlc::extract_script_key;
use crate::ports::daemon::{DaemonClient, InvoiceState, ASSET_TRANSFER_RECORD_TYPE};
use crate::ports::store::LedgerStore;
use crate::services::preimage::{PreimageCache, ScriptKeyIndex};
use crate::services::settlement::{SettlementOutcome, SettlementService};

/// Watches daemon event streams and drives the settlement engine when
/// an incoming HTLC reaches the accepted state. One long-lived loop
/// per process; per-invoice watchers are short-lived spawned tasks.
pub struct TransferMonitor {
    daemon: Arc<dyn DaemonClient>,
    store: Arc<dyn LedgerStore>,
    settlement: Arc<SettlementService>,
    preimages: Arc<PreimageCache>,
    script_keys: Arc<ScriptKeyIndex>,
    running: AtomicBool,
    heartbeat_interval: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

impl TransferMonitor {
    pub fn new(
        daemon: Arc<dyn DaemonClient>,
        store: Arc<dyn LedgerStore>,
        settlement: Arc<SettlementService>,
        preimages: Arc<PreimageCache>,
        heartbeat_interval: Duration,
    ) -> Self {
        TransferMonitor {
            daemon,
            store,
            settlement,
            preimages,
            script_keys: Arc::new(ScriptKeyIndex::new()),
            running: AtomicBool::new(false),
            heartbeat_interval,
            retry_delay: Duration::from_secs(5),
            max_retries: 5,
        }
    }

    pub fn script_keys(&self) -> &Arc<ScriptKeyIndex> {
        &self.script_keys
    }

    pub fn spawn(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(monitor.run());
    }

    /// Main loop: subscribe to the daemon's send-event stream (used
    /// only for logging; settlement is driven by per-invoice state)
    /// and run the heartbeat alongside it. After exhausting reconnect
    /// attempts it backs off and starts a fresh attempt cycle rather
    /// than going silent.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("transfer monitor already running");
            return;
        }
        info!("transfer monitor started");

        let heartbeat = {
            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.heartbeat_interval);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    monitor.heartbeat_sweep().await;
                }
            })
        };
        // The heartbeat lives exactly as long as the subscription loop.
        let _heartbeat_guard = AbortOnDrop(heartbeat);

        loop {
            let mut attempt = 0;
            while attempt < self.max_retries {
                match self.daemon.subscribe_send_events().await {
                    Ok(mut stream) => {
                        attempt = 0;
                        while let Some(event) = stream.next().await {
                            match event {
                                Ok(ev) => {
                                    debug!(state = %ev.state, detail = ?ev.detail, "asset send event");
                                }
                                Err(e) => {
                                    warn!(error = %e, "send event stream error");
                                    break;
                                }
                            }
                        }
                        warn!("send event stream closed, reconnecting");
                    }
                    Err(e) => {
                        warn!(error = %e, "could not subscribe to send events");
                    }
                }
                attempt += 1;
                tokio::time::sleep(self.retry_delay).await;
            }

            error!("transfer monitor exhausted retries, backing off before a new cycle");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    pub fn spawn_watch(self: &Arc<Self>, payment_hash: String) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.watch_invoice(&payment_hash).await;
        });
    }

    /// Watches one invoice's state stream until it resolves. An HTLC
    /// parks at ACCEPTED because we hold the preimage; that is the
    /// signal to settle.
    pub async fn watch_invoice(&self, payment_hash: &str) {
        let hash_bytes = match decode_hash(payment_hash) {
            Some(h) => h,
            None => {
                error!(payment_hash, "malformed payment hash, cannot watch");
                return;
            }
        };

        let mut attempt = 0;
        'reconnect: while attempt < self.max_retries {
            let mut stream = match self.daemon.subscribe_invoice_state(hash_bytes).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(payment_hash, error = %e, "invoice subscription failed");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };

            while let Some(update) = stream.next().await {
                let update = match update {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(payment_hash, error = %e, "invoice stream error");
                        attempt += 1;
                        tokio::time::sleep(self.retry_delay).await;
                        continue 'reconnect;
                    }
                };

                match update.state {
                    InvoiceState::Open => {
                        debug!(payment_hash, "invoice open, waiting for htlc");
                    }
                    InvoiceState::Accepted => {
                        self.index_script_keys(payment_hash, &update).await;
                        let outcome = self
                            .settlement
                            .settle_invoice(payment_hash, PaymentType::External, None)
                            .await;
                        if !outcome.success {
                            error!(
                                payment_hash,
                                detail = ?outcome.detail,
                                "settlement from monitor failed"
                            );
                        }
                        return;
                    }
                    InvoiceState::Settled => {
                        debug!(payment_hash, "invoice settled, watcher done");
                        return;
                    }
                    InvoiceState::Canceled => {
                        self.mark_cancelled(payment_hash).await;
                        return;
                    }
                }
            }

            warn!(payment_hash, "invoice stream ended without resolution");
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }

        error!(payment_hash, "gave up watching invoice after retries");
    }

    async fn index_script_keys(
        &self,
        payment_hash: &str,
        update: &crate::ports::daemon::InvoiceUpdate,
    ) {
        for htlc in &update.htlcs {
            if let Some(record) = htlc.custom_records.get(&ASSET_TRANSFER_RECORD_TYPE) {
                if let Some(script_key) = extract_script_key(record) {
                    debug!(payment_hash, script_key, "indexed htlc script key");
                    self.script_keys.insert(&script_key, payment_hash).await;
                }
            }
        }
    }

    async fn mark_cancelled(&self, payment_hash: &str) {
        let invoice = match self.store.get_invoice_by_hash(payment_hash).await {
            Ok(Some(inv)) if inv.is_pending() => inv,
            Ok(_) => return,
            Err(e) => {
                warn!(payment_hash, error = %e, "could not load invoice for cancellation");
                return;
            }
        };

        // The conditional update resolves the race with a concurrent
        // settlement: if the invoice flipped to paid in the meantime,
        // this is a no-op.
        let result = async {
            let mut tx = self.store.begin().await?;
            let changed = tx
                .update_invoice_status(invoice.id, InvoiceStatus::Cancelled.as_str())
                .await?;
            tx.commit().await?;
            Ok::<_, crate::error::AppError>(changed)
        }
        .await;

        match result {
            Ok(Some(_)) => info!(payment_hash, "invoice cancelled by daemon"),
            Ok(None) => debug!(payment_hash, "invoice left pending state before cancellation"),
            Err(e) => warn!(payment_hash, error = %e, "could not mark invoice cancelled"),
        }
    }

    /// Periodic sweep: expire stale preimages and retry any indexed
    /// hash whose invoice is still pending while we hold a preimage.
    pub async fn heartbeat_sweep(&self) {
        let swept = self.preimages.sweep_expired().await;
        if swept > 0 {
            debug!(swept, "swept expired preimages");
        }

        for payment_hash in self.script_keys.payment_hashes().await {
            let invoice = match self.store.get_invoice_by_hash(&payment_hash).await {
                Ok(Some(inv)) => inv,
                Ok(None) => continue,
                Err(e) => {
                    warn!(payment_hash, error = %e, "heartbeat could not load invoice");
                    continue;
                }
            };

            if invoice.is_pending() && self.preimages.get(&payment_hash).await.is_some() {
                info!(payment_hash, "heartbeat retrying stuck settlement");
                let outcome = self
                    .settlement
                    .settle_invoice(&payment_hash, PaymentType::External, None)
                    .await;
                if !outcome.success {
                    warn!(
                        payment_hash,
                        detail = ?outcome.detail,
                        "heartbeat settlement attempt failed"
                    );
                }
            }
        }
    }

    /// Operator fallback for an HTLC the stream watcher missed.
    pub async fn settle_manually(
        &self,
        payment_hash: &str,
        script_key: Option<&str>,
    ) -> SettlementOutcome {
        if let Some(script_key) = script_key {
            self.script_keys.insert(script_key, payment_hash).await;
        }
        self.settlement
            .settle_invoice(payment_hash, PaymentType::External, None)
            .await
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn decode_hash(payment_hash: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(payment_hash).ok()?;
    bytes.try_into().ok()
}
