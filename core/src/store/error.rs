//! Error types for document store operations

use thiserror::Error;

/// Errors surfaced by `DocumentStore` implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {id} not found")]
    NotFound { id: String },

    #[error("document {id} already exists")]
    AlreadyExists { id: String },

    #[error("store does not support transactions")]
    TransactionsUnsupported,

    /// A transaction closure aborted with a domain code. The caller maps this
    /// back onto its own error taxonomy.
    #[error("transaction aborted ({code}): {message}")]
    TxnAborted { code: String, message: String },

    #[error("invalid patch at '{path}': {reason}")]
    InvalidPatch { path: String, reason: String },

    #[error("document {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store backend failure: {reason}")]
    Backend { reason: String },
}
