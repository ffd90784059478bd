use rust_decimal::Decimal;
use thiserror::Error;

/// Error taxonomy shared by every gateway operation.
///
/// All variants abort the enclosing store transaction atomically; nothing
/// is left half-written. `Concurrency` is the only variant callers should
/// retry with the same idempotency key.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authority violation: service '{service}' may not perform '{capability}'")]
    AuthorityViolation { service: String, capability: String },

    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Idempotency error: {0}")]
    Idempotency(anyhow::Error),

    #[error("Concurrency conflict (retryable): {0}")]
    Concurrency(anyhow::Error),

    #[error("Ledger imbalance: debits {debits} != credits {credits}")]
    LedgerImbalance { debits: Decimal, credits: Decimal },

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether the caller may safely retry the operation with the same
    /// idempotency key. Lock-wait timeouts and in-flight duplicates are;
    /// everything else is not (a ledger imbalance in particular indicates
    /// a caller bug in line construction).
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Concurrency(_))
    }

    /// Stable label for metrics and audit context.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AuthorityViolation { .. } => "authority_violation",
            GatewayError::Validation(_) => "validation",
            GatewayError::Idempotency(_) => "idempotency",
            GatewayError::Concurrency(_) => "concurrency",
            GatewayError::LedgerImbalance { .. } => "ledger_imbalance",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::DatabaseError(_) => "db_error",
            GatewayError::ConfigError(_) => "config_error",
            GatewayError::InternalError(_) => "internal_error",
        }
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::ConfigError(anyhow::Error::new(err))
    }
}
