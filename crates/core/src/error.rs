//! Error types for the relayer engine.
//!
//! Domain modules return their own typed errors; the coordinator merges them
//! into the client-facing [`RelayerError`] kinds.

use thiserror::Error;

/// Admission authentication failures. All variants are reported upward as a
/// single UNAUTHENTICATED kind; the variant is kept for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing required auth field: {0}")]
    MissingField(&'static str),
    #[error("timestamp invalid or outside the replay window")]
    BadTimestamp,
    #[error("unknown builder api key")]
    UnknownBuilder,
    #[error("builder is not active")]
    InactiveBuilder,
    #[error("passphrase mismatch")]
    BadPassphrase,
    #[error("signature mismatch")]
    BadSignature,
}

/// Key custody failures.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("custody key must be exactly 32 bytes")]
    BadKeySize,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("unsupported kms backend: {0}")]
    Unsupported(String),
}

/// Persistent store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine error: {0}")]
    Backend(#[from] sled::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("transaction row {0} is no longer pending")]
    NotPending(u64),
    #[error("corrupt {entity} record: {key}")]
    Corrupt { entity: &'static str, key: String },
}

/// Failures of a single build-sign-broadcast attempt.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("no active operator available")]
    NoOperator,
    #[error("nonce allocation failed: {0}")]
    Nonce(String),
    #[error("gas estimation failed: {0}")]
    Estimate(String),
    #[error("gas price fetch failed: {0}")]
    Price(String),
    #[error("operator key unavailable")]
    Key,
    #[error("transaction signing failed: {0}")]
    Sign(String),
    #[error("broadcast failed: {0}")]
    Send(String),
}

/// Client-facing error kinds, per the external contract.
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for RelayerError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CustodyError> for RelayerError {
    fn from(err: CustodyError) -> Self {
        Self::Internal(err.to_string())
    }
}
