pub mod daemon;
pub mod notify;
pub mod store;

pub use daemon::DaemonClient;
pub use notify::NotificationSink;
pub use store::{LedgerStore, LedgerTx};
