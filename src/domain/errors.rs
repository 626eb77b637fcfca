use thiserror::Error;

/// Classified errors for outbound exchange calls. Cloneable so that
/// single-flight waiters sharing one underlying request all receive the
/// same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("Rate limited by exchange")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Validation error: {reason}")]
    Validation { reason: String },

    #[error("Request manager is shut down")]
    Shutdown,
}

impl ExchangeError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExchangeError::RateLimited { .. })
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::RateLimited { .. }
            | ExchangeError::Network { .. }
            | ExchangeError::Timeout { .. } => true,
            // Known-transient exchange codes: internal error, service busy
            ExchangeError::Api { code, .. } => matches!(code, 100500 | 100503),
            ExchangeError::Validation { .. } | ExchangeError::Shutdown => false,
        }
    }
}

/// Errors related to market data integrity and connectivity.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarketDataError {
    #[error("Invalid market data: {reason}")]
    InvalidData { reason: String },

    #[error("Stream connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Errors raised by the risk manager.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Startup cannot proceed (e.g. balance unavailable). Aborts the engine.
    #[error("Fatal risk error: {reason}")]
    Fatal { reason: String },

    #[error("Trade rejected: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
