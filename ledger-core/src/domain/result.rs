//! Result and error types for the core library

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::money::{Currency, Money};

/// Core library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Decimal),

    #[error("{currency} amounts allow at most {allowed} fractional digits, got {amount}")]
    InvalidPrecision {
        amount: Decimal,
        currency: Currency,
        allowed: u32,
    },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Currency mismatch: {expected} vs {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Money, requested: Money },

    #[error("Password does not match")]
    UnmatchedPassword,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Owner {owner_id} already holds the maximum of {limit} accounts")]
    AccountLimitReached { owner_id: uuid::Uuid, limit: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction scope is already {0}")]
    TransactionClosed(&'static str),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NegativeAmount(_) | Error::InvalidPrecision { .. } | Error::ZeroAmount => {
                ErrorKind::InvalidAmount
            }
            Error::UnsupportedCurrency(_) => ErrorKind::UnsupportedCurrency,
            Error::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            Error::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Error::UnmatchedPassword => ErrorKind::UnmatchedPassword,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::AccountLimitReached { .. } => ErrorKind::AccountLimitReached,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::TransactionClosed(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorKind::Persistence,
        }
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Database(format!("Lock poisoned: {}", err))
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of error kinds the presentation layer maps to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    UnsupportedCurrency,
    CurrencyMismatch,
    InsufficientFunds,
    UnmatchedPassword,
    NotFound,
    Validation,
    AccountLimitReached,
    Cancelled,
    Persistence,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::UnsupportedCurrency => "unsupported_currency",
            ErrorKind::CurrencyMismatch => "currency_mismatch",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::UnmatchedPassword => "unmatched_password",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::AccountLimitReached => "account_limit_reached",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Persistence => "persistence_failure",
        }
    }

    /// Fixed human-readable summary carrying no ledger data
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "Amount is not valid for the currency",
            ErrorKind::UnsupportedCurrency => "Currency is not supported",
            ErrorKind::CurrencyMismatch => "Currencies do not match",
            ErrorKind::InsufficientFunds => "Insufficient funds",
            ErrorKind::UnmatchedPassword => "Password does not match",
            ErrorKind::NotFound => "Account not found",
            ErrorKind::Validation => "Request is not valid",
            ErrorKind::AccountLimitReached => "Account limit reached",
            ErrorKind::Cancelled => "Operation cancelled",
            ErrorKind::Persistence => "Internal error",
        }
    }

    /// True for ledger rule violations, false for infrastructure failures
    pub fn is_domain(&self) -> bool {
        !matches!(self, ErrorKind::Persistence | ErrorKind::Cancelled)
    }
}

/// Operation result envelope handed to the presentation layer
///
/// Infrastructure failures carry a generic message so that no storage
/// detail crosses the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_code: Option<ErrorKind>,
    pub error: Option<String>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error: None,
        }
    }

    /// Create a failed result from a core error
    pub fn fail(err: &Error) -> Self {
        let kind = err.kind();
        let message = if kind.is_domain() {
            err.to_string()
        } else if kind == ErrorKind::Cancelled {
            "Operation cancelled".to_string()
        } else {
            "Internal error".to_string()
        };
        Self {
            success: false,
            data: None,
            error_code: Some(kind),
            error: Some(message),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(&e),
        }
    }
}
