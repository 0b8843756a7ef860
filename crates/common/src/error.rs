use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The plan cannot be executed; the run never starts.
    #[error("Invalid TWAP plan: {0}")]
    InvalidPlan(String),

    #[error("Order failed: {0}")]
    Order(#[from] OrderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why the exchange did not take an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthError,
    InsufficientFunds,
    RateLimited,
    /// Transport failure, timeout or an exchange 5xx: the order state is unknown.
    NetworkError,
    ExchangeRejected,
}

impl ErrorKind {
    /// Transport-level failures, as opposed to an explicit answer from the exchange.
    pub fn is_transport(&self) -> bool {
        matches!(self, ErrorKind::NetworkError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AuthError => write!(f, "auth error"),
            ErrorKind::InsufficientFunds => write!(f, "insufficient funds"),
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::NetworkError => write!(f, "network error"),
            ErrorKind::ExchangeRejected => write!(f, "rejected by exchange"),
        }
    }
}

/// Failure returned by an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct OrderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OrderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExchangeRejected, message)
    }
}
