use lightning_invoice::{Bolt11Invoice, Bolt11InvoiceDescription};
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::db::models::{PaymentType, Payment, SenderInfo};
use crate::error::AppError;
use crate::ports::daemon::{DaemonClient, RoutePaymentRequest};
use crate::ports::store::LedgerStore;
use crate::services::classify::classify_payment;
use crate::services::settlement::{RecordPaymentArgs, SettlementOutcome, SettlementService};

/// Minimum routing fee budget in satoshis. Quotes below this tend to
/// fail on multi-hop asset routes.
const MIN_FEE_LIMIT_SATS: i64 = 10;

#[derive(Debug, Clone)]
pub struct ParsedInvoice {
    pub payment_hash: String,
    pub description: String,
    pub amount_msat: Option<u64>,
}

/// Decodes a BOLT11 payment request far enough to classify and route it.
pub fn parse_asset_invoice(payment_request: &str) -> Result<ParsedInvoice, AppError> {
    let invoice = Bolt11Invoice::from_str(payment_request.trim())
        .map_err(|e| AppError::InvalidInvoice(format!("could not decode payment request: {e}")))?;

    let description = match invoice.description() {
        Bolt11InvoiceDescription::Direct(d) => d.to_string(),
        Bolt11InvoiceDescription::Hash(_) => String::new(),
    };

    Ok(ParsedInvoice {
        payment_hash: invoice.payment_hash().to_string(),
        description,
        amount_msat: invoice.amount_milli_satoshis(),
    })
}

fn asset_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"asset_id=([0-9a-fA-F]{64})").unwrap())
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"amount=(\d+)").unwrap())
}

/// Scrapes the `asset_id=<hex>` / `amount=<n>` convention out of an
/// invoice description. Amount falls back to 1 when absent; senders of
/// older invoices omitted it and receivers accepted any quantity.
pub fn scrape_asset_metadata(description: &str) -> Option<(String, i64)> {
    let asset_id = asset_id_re()
        .captures(description)
        .map(|c| c[1].to_lowercase())?;
    let amount = amount_re()
        .captures(description)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(1);
    Some((asset_id, amount))
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment_type: PaymentType,
    pub payment: Option<Payment>,
    pub settlement: Option<SettlementOutcome>,
    pub fee_msat: i64,
}

/// Outbound payment orchestration: classify, then either route over
/// lightning or hand the hash to the settlement engine.
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    daemon: Arc<dyn DaemonClient>,
    settlement: Arc<SettlementService>,
    default_fee_sats: i64,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        daemon: Arc<dyn DaemonClient>,
        settlement: Arc<SettlementService>,
        default_fee_sats: i64,
    ) -> Self {
        PaymentService {
            store,
            daemon,
            settlement,
            default_fee_sats,
        }
    }

    pub async fn process_payment(
        &self,
        payment_request: &str,
        actor: &SenderInfo,
        fee_limit_sats: Option<i64>,
        forced_type: Option<PaymentType>,
    ) -> Result<PaymentOutcome, AppError> {
        let parsed = parse_asset_invoice(payment_request)?;

        let (asset_id, asset_amount) = scrape_asset_metadata(&parsed.description)
            .ok_or_else(|| {
                AppError::InvalidInvoice(
                    "payment request carries no asset metadata".to_string(),
                )
            })?;

        let classification = match forced_type {
            Some(t) => t,
            None => {
                classify_payment(self.store.as_ref(), &parsed.payment_hash, &actor.user_id)
                    .await?
            }
        };

        match classification {
            PaymentType::External => {
                self.pay_external(
                    payment_request,
                    &parsed,
                    &asset_id,
                    asset_amount,
                    actor,
                    fee_limit_sats,
                )
                .await
            }
            PaymentType::Internal | PaymentType::SelfPayment => {
                self.settle_locally(
                    payment_request,
                    &parsed,
                    classification,
                    actor,
                )
                .await
            }
        }
    }

    /// Forces the ledger-only path. Used when the daemon has already
    /// refused the payment as a self-payment.
    pub async fn pay_internal(
        &self,
        payment_request: &str,
        actor: &SenderInfo,
    ) -> Result<PaymentOutcome, AppError> {
        self.process_payment(payment_request, actor, None, Some(PaymentType::Internal))
            .await
    }

    async fn pay_external(
        &self,
        payment_request: &str,
        parsed: &ParsedInvoice,
        asset_id: &str,
        asset_amount: i64,
        actor: &SenderInfo,
        fee_limit_sats: Option<i64>,
    ) -> Result<PaymentOutcome, AppError> {
        let fee_limit = fee_limit_sats
            .unwrap_or(self.default_fee_sats)
            .max(MIN_FEE_LIMIT_SATS);

        let routed = self
            .daemon
            .route_payment(RoutePaymentRequest {
                payment_request: payment_request.to_string(),
                asset_id: asset_id.to_string(),
                fee_limit_sats: fee_limit,
                peer_pubkey: None,
            })
            .await
            .map_err(|e| {
                if e.is_self_payment() {
                    AppError::Validation(
                        "invoice was issued by this node; retry as an internal payment"
                            .to_string(),
                    )
                } else {
                    AppError::Daemon(e)
                }
            })?;

        info!(
            payment_hash = %routed.payment_hash,
            fee_msat = routed.fee_msat,
            "external asset payment routed"
        );

        let fee_sats = routed.fee_msat / 1000;
        let payment = match self
            .settlement
            .record_payment(
                RecordPaymentArgs {
                    payment_hash: routed.payment_hash.clone(),
                    payment_request: payment_request.to_string(),
                    asset_id: asset_id.to_string(),
                    asset_amount,
                    fee_sats,
                    memo: Some(parsed.description.clone()),
                    user_id: actor.user_id.clone(),
                    wallet_id: actor.wallet_id.clone(),
                    preimage: Some(routed.preimage.clone()),
                },
                true,
            )
            .await
        {
            Ok(p) => Some(p),
            Err(e) => {
                // The payment is out on the network; losing the audit
                // row must not surface as a payment failure.
                warn!(payment_hash = %routed.payment_hash, error = %e, "payment sent but recording failed");
                None
            }
        };

        Ok(PaymentOutcome {
            payment_type: PaymentType::External,
            payment,
            settlement: None,
            fee_msat: routed.fee_msat,
        })
    }

    async fn settle_locally(
        &self,
        payment_request: &str,
        parsed: &ParsedInvoice,
        classification: PaymentType,
        actor: &SenderInfo,
    ) -> Result<PaymentOutcome, AppError> {
        let invoice = self
            .store
            .get_invoice_by_hash(&parsed.payment_hash)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no local invoice for payment hash {}",
                    parsed.payment_hash
                ))
            })?;

        let outcome = self
            .settlement
            .settle_invoice(
                &parsed.payment_hash,
                classification,
                Some(actor.clone()),
            )
            .await;

        if !outcome.success {
            let detail = outcome
                .detail
                .clone()
                .unwrap_or_else(|| "settlement failed".to_string());
            return Err(AppError::Validation(detail));
        }

        if outcome.already_settled {
            return Err(AppError::Validation(
                "invoice has already been paid".to_string(),
            ));
        }

        // Audit row only; the settlement transaction already moved the
        // balances for both sides.
        let payment = match self
            .settlement
            .record_payment(
                RecordPaymentArgs {
                    payment_hash: parsed.payment_hash.clone(),
                    payment_request: payment_request.to_string(),
                    asset_id: invoice.asset_id.clone(),
                    asset_amount: invoice.asset_amount,
                    fee_sats: 0,
                    memo: invoice.memo.clone(),
                    user_id: actor.user_id.clone(),
                    wallet_id: actor.wallet_id.clone(),
                    preimage: outcome.preimage.clone(),
                },
                false,
            )
            .await
        {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(payment_hash = %parsed.payment_hash, error = %e, "internal payment settled but recording failed");
                None
            }
        };

        Ok(PaymentOutcome {
            payment_type: classification,
            payment,
            settlement: Some(outcome),
            fee_msat: 0,
        })
    }
}
