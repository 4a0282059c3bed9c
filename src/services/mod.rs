pub mod classify;
pub mod invoices;
pub mod notifications;
pub mod payments;
pub mod preimage;
pub mod settlement;

pub use classify::classify_payment;
pub use invoices::InvoiceService;
pub use notifications::BroadcastNotifier;
pub use payments::PaymentService;
pub use preimage::{generate_preimage_pair, PreimageCache, ScriptKeyIndex};
pub use settlement::{SettlementOutcome, SettlementService, SettlementStatus};
