//! Error types for redlua.

use thiserror::Error;

/// The main error type for redlua operations.
#[derive(Debug, Error)]
pub enum RedluaError {
    /// The filter is neither a hash condition nor a tagged operator array.
    #[error("Unsupported filter shape: {0}")]
    UnsupportedFilterShape(String),

    /// A tagged filter used an operator outside the supported set.
    #[error("Found unknown operator in query: '{0}'")]
    UnknownOperator(String),

    /// An operator received fewer operands than it needs.
    #[error("Operator '{operator}' requires {expected} operand(s)")]
    MissingOperand {
        operator: String,
        expected: usize,
    },

    /// Structurally valid, but not something this engine can run.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Average over a result set with no numeric values.
    #[error("Aggregate over an empty result set")]
    EmptyAggregate,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The read buffer does not hold a complete reply yet.
    #[error("Incomplete data")]
    Incomplete,

    /// The round trip exceeded the configured deadline.
    #[error("Timeout")]
    Timeout,

    /// The server answered with an error reply.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedluaError {
    /// Create a missing operand error.
    pub fn missing(operator: impl Into<String>, expected: usize) -> Self {
        Self::MissingOperand {
            operator: operator.into(),
            expected,
        }
    }

    /// Create a not-supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported(message.into())
    }

    /// True for failures raised by the execute capability rather than by
    /// query construction.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Protocol(_)
                | Self::Incomplete
                | Self::Timeout
                | Self::Server(_)
                | Self::Io(_)
        )
    }

    /// True when a fresh attempt over a new connection may succeed.
    ///
    /// Server error replies are excluded: they point at a bad program,
    /// and sending it again will fail the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Io(_))
    }
}

/// Result type alias for redlua operations.
pub type RedluaResult<T> = Result<T, RedluaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RedluaError::missing("between", 3);
        assert_eq!(
            err.to_string(),
            "Operator 'between' requires 3 operand(s)"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(RedluaError::Timeout.is_retryable());
        assert!(RedluaError::Server("ERR bad script".into()).is_transport());
        assert!(!RedluaError::Server("ERR bad script".into()).is_retryable());
        assert!(!RedluaError::not_supported("like").is_transport());
        assert!(!RedluaError::UnknownOperator("xor".into()).is_retryable());
    }
}
