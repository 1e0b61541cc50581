//! Error types for meiju-core.
//!
//! API call outcomes are modeled as [`crate::ApiOutcome`] values; this
//! error type covers the faults that are not outcomes: login failures,
//! credential store trouble, and cryptographic failures.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;

/// Error type for meiju-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Login or credential refresh was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A response was missing an expected field or had an unexpected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// A cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The credential store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
