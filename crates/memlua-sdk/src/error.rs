//! Error types for the stack bridge

/// Result type for bridge calls
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the bridge and everything layered on it
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Engine library or one of its entry points could not be resolved
    #[error("Bridge unavailable: {0}")]
    Unavailable(String),

    /// Requested global is absent or not a function
    #[error("function not available: {symbol}")]
    SymbolNotFound {
        /// Global name that was looked up
        symbol: String,
    },

    /// Protected call reported a runtime error
    #[error("call failed: {symbol}: {message}")]
    CallFailed {
        /// Remote function that failed (empty when raised by a host callback)
        symbol: String,
        /// Error value left on the stack by the engine
        message: String,
    },

    /// Argument rejected before any bridge call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Session operation invoked out of order
    #[error("Phase violation: {0}")]
    PhaseViolation(String),

    /// Unique-match request on zero or several matches
    #[error("{0}")]
    AmbiguousResult(String),

    /// Slot holds a value of the wrong dynamic type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// The engine is already borrowed further up the call chain
    #[error("engine is busy (re-entrant access outside the callback stack)")]
    Busy,
}

impl BridgeError {
    /// Shorthand for a failed call on `symbol`
    pub fn call_failed(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::CallFailed {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing global
    pub fn symbol_not_found(symbol: impl Into<String>) -> Self {
        BridgeError::SymbolNotFound {
            symbol: symbol.into(),
        }
    }

    /// Text raised into the engine when a host callback fails
    pub fn engine_message(&self) -> String {
        match self {
            BridgeError::CallFailed { symbol, message } if symbol.is_empty() => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::call_failed(String::new(), s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::call_failed(String::new(), s)
    }
}
