//! Gap detection: bounds the next unit of reconciliation work for a base
//! asset. Ingestion and linkage run at different cadences, so the frontier
//! is always recomputed from current linkage state instead of trusting a
//! stored cursor; the queries here are safe to re-run after any partial
//! failure.

use alloy::primitives::B256;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{DataIntegrityError, StoreError};
use crate::status::SwapStatus;

/// Inclusive block bounds of the unlinked, successful swaps for one base
/// asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub min_block: u64,
    pub max_block: u64,
}

/// Min/max block among successful swaps with no trade link. `None` means
/// fully reconciled (or no successful swaps at all) — nothing to do, not an
/// error.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn unlinked_block_range(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<Option<BlockRange>, StoreError> {
    let (min_block, max_block): (Option<i64>, Option<i64>) = sqlx::query_as(
        r#"
        SELECT MIN(s.block_number), MAX(s.block_number)
        FROM swaps s
        LEFT JOIN trade_swap_links l ON l.swap_id = s.id
        WHERE s.base_asset_id = ?1 AND s.status = ?2 AND l.id IS NULL
        "#,
    )
    .bind(base_asset_id)
    .bind(SwapStatus::Success.as_str())
    .fetch_one(pool)
    .await?;

    match (min_block, max_block) {
        (Some(min), Some(max)) => Ok(Some(BlockRange {
            min_block: u64::try_from(min)?,
            max_block: u64::try_from(max)?,
        })),
        _ => Ok(None),
    }
}

/// The cursor from which a caller should re-scan: the larger of the maximum
/// already-linked block and the minimum unlinked block, success-filtered.
/// Taking the max of both guarantees no gap is silently skipped when
/// linkage and ingestion interleave out of order.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn resume_block(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<Option<u64>, StoreError> {
    let linked_max: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MAX(s.block_number)
        FROM swaps s
        JOIN trade_swap_links l ON l.swap_id = s.id
        WHERE s.base_asset_id = ?1 AND s.status = ?2
        "#,
    )
    .bind(base_asset_id)
    .bind(SwapStatus::Success.as_str())
    .fetch_one(pool)
    .await?;

    let unlinked_min: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MIN(s.block_number)
        FROM swaps s
        LEFT JOIN trade_swap_links l ON l.swap_id = s.id
        WHERE s.base_asset_id = ?1 AND s.status = ?2 AND l.id IS NULL
        "#,
    )
    .bind(base_asset_id)
    .bind(SwapStatus::Success.as_str())
    .fetch_one(pool)
    .await?;

    linked_max
        .into_iter()
        .chain(unlinked_min)
        .max()
        .map(|block| Ok(u64::try_from(block)?))
        .transpose()
}

/// Distinct transaction hashes of unlinked successful swaps at or above the
/// cursor, oldest first. The boundary is inclusive so a cursor equal to the
/// minimum unlinked block cannot skip that block's transactions.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn unprocessed_tx_hashes(
    pool: &SqlitePool,
    base_asset_id: i64,
    from_block: u64,
) -> Result<Vec<B256>, StoreError> {
    let from_block = i64::try_from(from_block)?;

    let hashes: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT s.tx_hash
        FROM swaps s
        LEFT JOIN trade_swap_links l ON l.swap_id = s.id
        WHERE s.base_asset_id = ?1 AND s.status = ?2 AND l.id IS NULL AND s.block_number >= ?3
        GROUP BY s.tx_hash
        ORDER BY MIN(s.block_number) ASC, MIN(s.log_index) ASC
        "#,
    )
    .bind(base_asset_id)
    .bind(SwapStatus::Success.as_str())
    .bind(from_block)
    .fetch_all(pool)
    .await?;

    hashes
        .into_iter()
        .map(|hash| {
            hash.parse::<B256>()
                .map_err(|_| StoreError::from(DataIntegrityError::MalformedTxHash(hash)))
        })
        .collect()
}
