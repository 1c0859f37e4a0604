//! Error taxonomy for the data plane, generalizing the teacher's `AdapterError`
//! (see `services/adapters/src/error.rs`) to the oracle's transport/protocol/venue/
//! validation/request categories from spec §7.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OracleError>;

/// Errors surfaced by adapters, the data manager, and the aggregation pipeline.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("{adapter}: connection failed: {reason}")]
    ConnectionFailed { adapter: String, reason: String },

    #[error("{adapter}: connection timed out after {timeout_ms}ms")]
    ConnectionTimeout { adapter: String, timeout_ms: u64 },

    #[error("{adapter}: not connected")]
    NotConnected { adapter: String },

    #[error("{adapter}: authentication failed")]
    AuthenticationFailed { adapter: String },

    #[error("{adapter}: no valid symbols in request")]
    InvalidSymbols { adapter: String },

    #[error("{adapter}: venue protocol error: {message}")]
    VenueProtocolError { adapter: String, message: String },

    #[error("{adapter}: parse error: {message}")]
    ParseError { adapter: String, message: String },

    #[error("{adapter}: rate limit exceeded")]
    RateLimitExceeded { adapter: String },

    #[error("{adapter}: request timed out")]
    TimeoutError { adapter: String },

    #[error("{adapter}: HTTP {status}")]
    HttpStatus { adapter: String, status: u16 },

    #[error("{adapter}: venue error {code}: {message}")]
    VenueError {
        adapter: String,
        code: String,
        message: String,
    },

    #[error("{adapter}: circuit breaker open")]
    CircuitBreakerOpen { adapter: String },

    #[error("{adapter}: max reconnect attempts ({max_attempts}) exceeded")]
    MaxReconnectAttemptsExceeded { adapter: String, max_attempts: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OracleError {
    /// Transport and venue-5xx classes are retryable with backoff (spec §7).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OracleError::ConnectionFailed { .. }
                | OracleError::ConnectionTimeout { .. }
                | OracleError::NotConnected { .. }
                | OracleError::TimeoutError { .. }
                | OracleError::HttpStatus { .. }
                | OracleError::VenueError { .. }
                | OracleError::WebSocket(_)
                | OracleError::Io(_)
                | OracleError::Http(_)
        )
    }

    /// Venue-permanent classes (auth, config) never retry and open the circuit.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OracleError::AuthenticationFailed { .. } | OracleError::Configuration(_)
        )
    }

    /// Protocol-level errors drop the frame but never invalidate adapter state.
    pub fn should_invalidate_state(&self) -> bool {
        !matches!(
            self,
            OracleError::ParseError { .. } | OracleError::InvalidSymbols { .. } | OracleError::Json(_)
        )
    }

    /// Adapter name this error is attributed to, when it carries one.
    pub fn adapter_name(&self) -> Option<&str> {
        match self {
            OracleError::ConnectionFailed { adapter, .. }
            | OracleError::ConnectionTimeout { adapter, .. }
            | OracleError::NotConnected { adapter }
            | OracleError::AuthenticationFailed { adapter }
            | OracleError::InvalidSymbols { adapter }
            | OracleError::VenueProtocolError { adapter, .. }
            | OracleError::ParseError { adapter, .. }
            | OracleError::RateLimitExceeded { adapter }
            | OracleError::TimeoutError { adapter }
            | OracleError::HttpStatus { adapter, .. }
            | OracleError::VenueError { adapter, .. }
            | OracleError::CircuitBreakerOpen { adapter }
            | OracleError::MaxReconnectAttemptsExceeded { adapter, .. } => Some(adapter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_recoverable() {
        let e = OracleError::ConnectionFailed {
            adapter: "binance".into(),
            reason: "refused".into(),
        };
        assert!(e.is_recoverable());
        assert!(!e.is_permanent());
    }

    #[test]
    fn auth_errors_are_permanent_and_not_recoverable() {
        let e = OracleError::AuthenticationFailed {
            adapter: "kraken".into(),
        };
        assert!(e.is_permanent());
        assert!(!e.is_recoverable());
    }

    #[test]
    fn parse_errors_do_not_invalidate_state() {
        let e = OracleError::ParseError {
            adapter: "okx".into(),
            message: "bad frame".into(),
        };
        assert!(!e.should_invalidate_state());
    }
}
