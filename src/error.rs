//! Domain-specific error types following clean error handling architecture.
//! Precondition, data-integrity, and connectivity failures stay separate so
//! the orchestrating job runner can decide what is worth retrying.

use std::num::TryFromIntError;
use std::time::Duration;

use crate::status::{ParseAddressKindError, ParseStatusError};

/// An operation was called with arguments that can never succeed.
/// Rejected before any statement executes; no partial effect.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("trade id must be positive, got {0}")]
    InvalidTradeId(i64),
    #[error("swap id must be positive, got {0}")]
    InvalidSwapId(i64),
    #[error("no base assets configured, nothing to reconcile")]
    NoBaseAssets,
}

/// The store contains rows that violate an upstream invariant. Surfaced,
/// never silently resolved: picking one of two case-variant matches could
/// corrupt accounting.
#[derive(Debug, thiserror::Error)]
pub enum DataIntegrityError {
    #[error("address string {address} matches {matches} canonical addresses differing only by case")]
    AmbiguousAddress { address: String, matches: i64 },
    #[error("token contract {contract} matches {matches} canonical assets differing only by case")]
    AmbiguousAsset { contract: String, matches: i64 },
    #[error("transfer in tx {tx_hash} carries a non-integer amount: {value:?}")]
    MalformedAmount { tx_hash: String, value: String },
    #[error("net amount overflow aggregating tx {tx_hash} token {token}")]
    AmountOverflow { tx_hash: String, token: String },
    #[error("malformed transaction hash in store: {0:?}")]
    MalformedTxHash(String),
    #[error("link {trade_id}->{swap_id} carries a non-decimal contributed amount: {value:?}")]
    MalformedContribution {
        trade_id: i64,
        swap_id: i64,
        value: String,
    },
    #[error("unknown status code: {0}")]
    Status(#[from] ParseStatusError),
    #[error("unknown address kind: {0}")]
    AddressKind(#[from] ParseAddressKindError),
    #[error("stored integer out of range: {0}")]
    IntRange(#[from] TryFromIntError),
}

/// Unified error for a single store-touching operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("precondition violation: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("data integrity violation: {0}")]
    Integrity(#[from] DataIntegrityError),
}

impl From<TryFromIntError> for StoreError {
    fn from(err: TryFromIntError) -> Self {
        Self::Integrity(DataIntegrityError::IntRange(err))
    }
}

impl From<ParseStatusError> for StoreError {
    fn from(err: ParseStatusError) -> Self {
        Self::Integrity(DataIntegrityError::Status(err))
    }
}

impl From<ParseAddressKindError> for StoreError {
    fn from(err: ParseAddressKindError) -> Self {
        Self::Integrity(DataIntegrityError::AddressKind(err))
    }
}

impl StoreError {
    /// Connectivity failures are worth retrying; precondition and integrity
    /// violations never correct themselves.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Precondition(_) | Self::Integrity(_) => false,
        }
    }
}

/// Pipeline step names, used to tag failures so the operator log identifies
/// which part of a run went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lease,
    GapDetection,
    AddressBackfill,
    AssetBackfill,
    Aggregation,
    Linking,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lease => "lease acquisition",
            Self::GapDetection => "gap detection",
            Self::AddressBackfill => "address backfill",
            Self::AssetBackfill => "asset backfill",
            Self::Aggregation => "net transfer aggregation",
            Self::Linking => "trade linkage",
        };
        f.write_str(name)
    }
}

/// Error from a full reconciliation run for one base asset.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{stage} failed: {source}")]
    Step {
        stage: Stage,
        #[source]
        source: StoreError,
    },
    #[error("{stage} exceeded the {limit:?} operation deadline")]
    Timeout { stage: Stage, limit: Duration },
}

impl ReconcileError {
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Step { source, .. } => source.is_retryable(),
            Self::Timeout { .. } => true,
        }
    }

    pub const fn stage(&self) -> Stage {
        match self {
            Self::Step { stage, .. } | Self::Timeout { stage, .. } => *stage,
        }
    }
}
