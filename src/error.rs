//! Error types shared by the miner, wallet, and server.

use thiserror::Error;

/// Main error type for the webcash crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed amount, claim code, or JSON payload.
    #[error("parse error: {0}")]
    Parse(String),

    /// A request failed validation (imbalance, duplicate, stale difficulty).
    #[error("validation error: {0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("server rejected request: status {status}: {body}")]
    ServerRejected {
        /// HTTP status code of the response
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Wallet persistence failure.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// Bad command-line flags or config file.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport failure (no response, timeout, connection reset).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ledger database failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Wallet database failure.
    #[error("wallet database error: {0}")]
    WalletDb(#[from] rusqlite::Error),

    /// JSON encoding/decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a wallet error.
    pub fn wallet(msg: impl Into<String>) -> Self {
        Self::Wallet(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a transport-level failure (no HTTP response was
    /// received).  Transport failures are the only errors the submission
    /// worker retries by re-queueing the solution.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Io(_))
    }
}
