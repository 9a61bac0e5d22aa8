use thiserror::Error;

/// Errors surfaced by quote providers and the live-quote path.
///
/// The taxonomy matters more than the types: transient and rate-limit
/// errors are retried or absorbed locally, provider-semantic errors feed
/// the circuit breakers, validation and staleness errors are never retried.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("transport failure for {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("request to {provider} timed out after {duration_ms}ms")]
    Timeout { provider: String, duration_ms: u64 },

    #[error("rate limit exhausted for {provider}")]
    RateLimited { provider: String },

    #[error("daily budget exhausted for {provider}")]
    BudgetExhausted { provider: String },

    #[error("provider {provider} returned an error: {reason}")]
    ProviderSemantic { provider: String, reason: String },

    #[error("bad symbol {symbol}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("invalid quote for {symbol}: {reason}")]
    InvalidQuote { symbol: String, reason: String },

    #[error("stale quote for {symbol}: age {age_ms}ms > ceiling {ceiling_ms}ms")]
    Stale {
        symbol: String,
        age_ms: u64,
        ceiling_ms: u64,
    },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: String },

    #[error("hotpath rejected request: {0}")]
    HotpathBlocked(String),
}

impl QuoteError {
    /// Whether the error should count against provider health and the
    /// circuit breaker. Validation failures are the caller's problem,
    /// not the provider's.
    pub fn is_provider_fault(&self) -> bool {
        matches!(
            self,
            QuoteError::Transport { .. }
                | QuoteError::Timeout { .. }
                | QuoteError::RateLimited { .. }
                | QuoteError::ProviderSemantic { .. }
        )
    }
}

/// Errors from the streaming transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {reason}")]
    Connect { reason: String },

    #[error("stream request failed with status {status}")]
    BadStatus { status: u16 },

    #[error("malformed stream payload: {reason}")]
    Malformed { reason: String },

    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Errors from the paper outbox ledger.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("failed to open ledger at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append ledger entry: {source}")]
    Append {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize ledger entry: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_fault_classification() {
        let fault = QuoteError::Timeout {
            provider: "polygon".to_string(),
            duration_ms: 1500,
        };
        assert!(fault.is_provider_fault());

        let not_fault = QuoteError::InvalidSymbol {
            symbol: "ZZZZ".to_string(),
            reason: "unknown".to_string(),
        };
        assert!(!not_fault.is_provider_fault());
    }

    #[test]
    fn test_stale_error_formatting() {
        let err = QuoteError::Stale {
            symbol: "AAPL".to_string(),
            age_ms: 9000,
            ceiling_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("9000"));
        assert!(msg.contains("5000"));
    }
}
