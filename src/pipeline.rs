//! One reconciliation pass for a single base asset: lease, gap detection,
//! identity backfill, then the candidate set and net transfer facts the
//! trade deriver consumes. Each step is a single round trip against the
//! store under a bounded deadline; nothing here retries — that policy
//! belongs to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{ReconcileError, Stage, StoreError};
use crate::model::Swap;
use crate::reconcile::gap::{self, BlockRange};
use crate::reconcile::netflow::{self, NetTransfer};
use crate::reconcile::{backfill, lease, linker};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Ceiling for a single store round trip. Exceeding it is a retryable
    /// failure, not a data error.
    pub op_timeout: Duration,
    pub lease_ttl_minutes: u32,
    /// Checked between steps; a set flag aborts before the next operation
    /// starts, never mid-operation.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(30),
            lease_ttl_minutes: lease::DEFAULT_LEASE_TTL_MINUTES,
            cancel_flag: None,
        }
    }
}

impl PipelineOptions {
    fn cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Everything a downstream trade deriver needs from one pass.
#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub base_asset_id: i64,
    pub block_range: BlockRange,
    pub resume_block: u64,
    pub addresses_backfilled: u64,
    pub assets_backfilled: u64,
    pub candidates: Vec<Swap>,
    pub net_transfers: Vec<NetTransfer>,
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Completed(Box<ReconcileReport>),
    /// The base asset is fully reconciled (or has no successful swaps).
    NothingToDo,
    /// Another run holds the lease; the caller should try again later.
    LeaseHeld,
    /// The cancel flag was set between steps.
    Cancelled,
}

/// Runs the full pass. The lease is always released afterwards, including
/// on step failure; a crash instead leaves it to expire via TTL.
#[tracing::instrument(skip(pool, opts), level = tracing::Level::INFO)]
pub async fn reconcile_base_asset(
    pool: &SqlitePool,
    base_asset_id: i64,
    opts: &PipelineOptions,
) -> Result<ReconcileOutcome, ReconcileError> {
    if !acquire_lease(pool, base_asset_id, opts).await? {
        return Ok(ReconcileOutcome::LeaseHeld);
    }

    let result = run_steps(pool, base_asset_id, opts).await;
    let released = release_lease(pool, base_asset_id).await;

    // A failed release must not mask the step error; the lease will expire
    // via TTL either way.
    match (result, released) {
        (Err(step_err), _) => Err(step_err),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Ok(outcome), Ok(())) => Ok(outcome),
    }
}

async fn run_steps(
    pool: &SqlitePool,
    base_asset_id: i64,
    opts: &PipelineOptions,
) -> Result<ReconcileOutcome, ReconcileError> {
    let range = timed(
        Stage::GapDetection,
        opts.op_timeout,
        gap::unlinked_block_range(pool, base_asset_id),
    )
    .await?;

    let Some(block_range) = range else {
        info!("Base asset {base_asset_id} fully reconciled, nothing to do");
        return Ok(ReconcileOutcome::NothingToDo);
    };

    let resume_block = timed(
        Stage::GapDetection,
        opts.op_timeout,
        gap::resume_block(pool, base_asset_id),
    )
    .await?
    // An unlinked range exists, so the resume query cannot come back
    // empty; the range minimum is the conservative fallback.
    .unwrap_or(block_range.min_block);

    debug!(
        "Base asset {base_asset_id}: unlinked blocks {}..={}, resuming at {resume_block}",
        block_range.min_block, block_range.max_block
    );

    if opts.cancelled() {
        return Ok(ReconcileOutcome::Cancelled);
    }

    let addresses_backfilled = timed(
        Stage::AddressBackfill,
        opts.op_timeout,
        backfill::backfill_address_ids(pool, base_asset_id),
    )
    .await?;

    if opts.cancelled() {
        return Ok(ReconcileOutcome::Cancelled);
    }

    let assets_backfilled = timed(
        Stage::AssetBackfill,
        opts.op_timeout,
        backfill::backfill_asset_ids(pool, base_asset_id),
    )
    .await?;

    if opts.cancelled() {
        return Ok(ReconcileOutcome::Cancelled);
    }

    let tx_hashes = timed(
        Stage::GapDetection,
        opts.op_timeout,
        gap::unprocessed_tx_hashes(pool, base_asset_id, resume_block),
    )
    .await?;

    let net_transfers = timed(
        Stage::Aggregation,
        opts.op_timeout,
        netflow::net_transfers_for_tx_set(pool, &tx_hashes, base_asset_id),
    )
    .await?;

    if opts.cancelled() {
        return Ok(ReconcileOutcome::Cancelled);
    }

    let candidates = timed(
        Stage::Linking,
        opts.op_timeout,
        linker::find_missing_trades_from_swaps(pool, base_asset_id),
    )
    .await?;

    info!(
        "Base asset {base_asset_id}: {} candidate swaps over {} transactions, \
         backfilled {addresses_backfilled} addresses / {assets_backfilled} assets",
        candidates.len(),
        tx_hashes.len(),
    );

    Ok(ReconcileOutcome::Completed(Box::new(ReconcileReport {
        base_asset_id,
        block_range,
        resume_block,
        addresses_backfilled,
        assets_backfilled,
        candidates,
        net_transfers,
    })))
}

async fn acquire_lease(
    pool: &SqlitePool,
    base_asset_id: i64,
    opts: &PipelineOptions,
) -> Result<bool, ReconcileError> {
    timed(Stage::Lease, opts.op_timeout, async {
        let mut sql_tx = pool.begin().await.map_err(StoreError::from)?;
        let acquired =
            lease::try_acquire_reconcile_lease(&mut sql_tx, base_asset_id, opts.lease_ttl_minutes)
                .await?;
        sql_tx.commit().await.map_err(StoreError::from)?;
        Ok(acquired)
    })
    .await
}

async fn release_lease(pool: &SqlitePool, base_asset_id: i64) -> Result<(), ReconcileError> {
    let release = async {
        let mut sql_tx = pool.begin().await.map_err(StoreError::from)?;
        lease::release_reconcile_lease(&mut sql_tx, base_asset_id).await?;
        sql_tx.commit().await.map_err(StoreError::from)
    };

    release.await.map_err(|source| ReconcileError::Step {
        stage: Stage::Lease,
        source,
    })
}

async fn timed<T, F>(stage: Stage, limit: Duration, operation: F) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ReconcileError::Step { stage, source }),
        Err(_) => Err(ReconcileError::Timeout { stage, limit }),
    }
}
