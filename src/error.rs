use thiserror::Error;

/// RPC status codes surfaced by the asset daemon boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    DeadlineExceeded,
    Internal,
    Unknown,
}

/// Error returned by a `DaemonClient` implementation.
#[derive(Debug, Clone, Error)]
#[error("daemon error ({code:?}): {message}")]
pub struct DaemonError {
    pub code: RpcCode,
    pub message: String,
}

impl DaemonError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        DaemonError {
            code,
            message: message.into(),
        }
    }

    /// The daemon reports double-settlement of a HODL invoice with this
    /// message; callers treat it as success, not failure.
    pub fn is_already_settled(&self) -> bool {
        self.message.to_lowercase().contains("invoice is already settled")
    }

    /// The daemon refuses to route a payment back to our own node.
    pub fn is_self_payment(&self) -> bool {
        self.message.to_lowercase().contains("self-payments not allowed")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Maps a daemon error onto a human-readable detail string.
///
/// The daemon only distinguishes many asset-channel conditions through
/// message text, so the brittle substring matching lives here and
/// nowhere else.
pub fn daemon_error_detail(err: &DaemonError) -> String {
    let msg = err.message.to_lowercase();

    if msg.contains("multiple asset channels found for asset") {
        return "Multiple channels exist for this asset; specify a peer to disambiguate".to_string();
    }
    if msg.contains("no asset channel balance found") {
        return "Insufficient channel balance for this asset".to_string();
    }
    if msg.contains("no asset channel found") {
        return "No open channel carries this asset".to_string();
    }
    if msg.contains("peer") && msg.contains("offline") {
        return "The channel peer is offline; try again later".to_string();
    }
    if err.is_self_payment() {
        return "This invoice belongs to our own node; retry as an internal payment".to_string();
    }
    if msg.contains("invalid payment request") || msg.contains("unable to decode") {
        return "The payment request could not be decoded".to_string();
    }

    match err.code {
        RpcCode::NotFound => "The requested record was not found on the daemon".to_string(),
        RpcCode::InvalidArgument => format!("The daemon rejected the request: {}", err.message),
        RpcCode::FailedPrecondition => {
            format!("The daemon is not in a state to perform this: {}", err.message)
        }
        RpcCode::PermissionDenied | RpcCode::Unauthenticated => {
            "Not authorized against the asset daemon; check macaroon/TLS settings".to_string()
        }
        RpcCode::Unavailable => "The asset daemon is unreachable".to_string(),
        RpcCode::DeadlineExceeded => "The asset daemon timed out".to_string(),
        _ => format!("Daemon error: {}", err.message),
    }
}
