//! Identity backfill: opportunistically fills the resolved-id foreign keys
//! on raw transfer/swap rows once a canonical address or asset record
//! exists for the raw string. Matching is case-insensitive string equality,
//! never fuzzy, and a field is only ever written while NULL.
//!
//! Each backfill call is a single transaction: either every qualifying row
//! is updated or none is. Re-running with no new canonical records is a
//! no-op.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::error::{DataIntegrityError, StoreError};

/// Distinct raw sender/recipient/maker strings for the base asset that have
/// no resolved id and no case-insensitive canonical match yet — the strings
/// still waiting for an Address record to be created upstream.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn unresolved_address_strings(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<Vec<String>, StoreError> {
    let strings: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT raw FROM (
            SELECT t.sender AS raw FROM transfers t
            WHERE t.base_asset_id = ?1 AND t.sender_address_id IS NULL
            UNION
            SELECT t.recipient FROM transfers t
            WHERE t.base_asset_id = ?1 AND t.recipient_address_id IS NULL
            UNION
            SELECT s.maker FROM swaps s
            WHERE s.base_asset_id = ?1 AND s.maker_address_id IS NULL
        )
        WHERE NOT EXISTS (
            SELECT 1 FROM addresses a WHERE a.address = raw COLLATE NOCASE
        )
        ORDER BY raw
        "#,
    )
    .bind(base_asset_id)
    .fetch_all(pool)
    .await?;

    Ok(strings)
}

/// Fills `sender_address_id`, `recipient_address_id` (transfers) and
/// `maker_address_id` (swaps) wherever the id is NULL and exactly one
/// canonical address matches case-insensitively. Returns rows affected.
#[tracing::instrument(skip(pool), level = tracing::Level::INFO)]
pub async fn backfill_address_ids(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<u64, StoreError> {
    let mut sql_tx = pool.begin().await?;

    ensure_unambiguous_address_matches(&mut sql_tx, base_asset_id).await?;

    let senders = sqlx::query(
        r#"
        UPDATE transfers SET sender_address_id = (
            SELECT a.id FROM addresses a WHERE a.address = transfers.sender COLLATE NOCASE
        )
        WHERE base_asset_id = ?1
          AND sender_address_id IS NULL
          AND EXISTS (
            SELECT 1 FROM addresses a WHERE a.address = transfers.sender COLLATE NOCASE
          )
        "#,
    )
    .bind(base_asset_id)
    .execute(&mut *sql_tx)
    .await?
    .rows_affected();

    let recipients = sqlx::query(
        r#"
        UPDATE transfers SET recipient_address_id = (
            SELECT a.id FROM addresses a WHERE a.address = transfers.recipient COLLATE NOCASE
        )
        WHERE base_asset_id = ?1
          AND recipient_address_id IS NULL
          AND EXISTS (
            SELECT 1 FROM addresses a WHERE a.address = transfers.recipient COLLATE NOCASE
          )
        "#,
    )
    .bind(base_asset_id)
    .execute(&mut *sql_tx)
    .await?
    .rows_affected();

    let makers = sqlx::query(
        r#"
        UPDATE swaps SET maker_address_id = (
            SELECT a.id FROM addresses a WHERE a.address = swaps.maker COLLATE NOCASE
        )
        WHERE base_asset_id = ?1
          AND maker_address_id IS NULL
          AND EXISTS (
            SELECT 1 FROM addresses a WHERE a.address = swaps.maker COLLATE NOCASE
          )
        "#,
    )
    .bind(base_asset_id)
    .execute(&mut *sql_tx)
    .await?
    .rows_affected();

    sql_tx.commit().await?;

    let affected = senders + recipients + makers;
    if affected > 0 {
        info!(
            "Backfilled {affected} address ids for base asset {base_asset_id} \
             ({senders} senders, {recipients} recipients, {makers} makers)"
        );
    }

    Ok(affected)
}

/// Fills `transfers.asset_id` by matching the raw token contract string
/// against canonical assets, case-insensitively. Returns rows affected.
#[tracing::instrument(skip(pool), level = tracing::Level::INFO)]
pub async fn backfill_asset_ids(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<u64, StoreError> {
    let mut sql_tx = pool.begin().await?;

    ensure_unambiguous_asset_matches(&mut sql_tx, base_asset_id).await?;

    let affected = sqlx::query(
        r#"
        UPDATE transfers SET asset_id = (
            SELECT a.id FROM assets a
            WHERE a.contract_address = transfers.token_address COLLATE NOCASE
        )
        WHERE base_asset_id = ?1
          AND asset_id IS NULL
          AND EXISTS (
            SELECT 1 FROM assets a
            WHERE a.contract_address = transfers.token_address COLLATE NOCASE
          )
        "#,
    )
    .bind(base_asset_id)
    .execute(&mut *sql_tx)
    .await?
    .rows_affected();

    sql_tx.commit().await?;

    if affected > 0 {
        info!("Backfilled {affected} asset ids for base asset {base_asset_id}");
    }

    Ok(affected)
}

/// Two canonical addresses differing only by case that would both match a
/// pending raw string mean the upstream registry is corrupt. Resolving the
/// tie here could attribute custody to the wrong entity, so the whole call
/// is rejected before any update runs.
async fn ensure_unambiguous_address_matches(
    sql_tx: &mut Transaction<'_, Sqlite>,
    base_asset_id: i64,
) -> Result<(), StoreError> {
    let ambiguous: Option<(String, i64)> = sqlx::query_as(
        r#"
        SELECT lower(a.address), COUNT(*)
        FROM addresses a
        WHERE lower(a.address) IN (
            SELECT lower(t.sender) FROM transfers t
            WHERE t.base_asset_id = ?1 AND t.sender_address_id IS NULL
            UNION
            SELECT lower(t.recipient) FROM transfers t
            WHERE t.base_asset_id = ?1 AND t.recipient_address_id IS NULL
            UNION
            SELECT lower(s.maker) FROM swaps s
            WHERE s.base_asset_id = ?1 AND s.maker_address_id IS NULL
        )
        GROUP BY lower(a.address)
        HAVING COUNT(*) > 1
        LIMIT 1
        "#,
    )
    .bind(base_asset_id)
    .fetch_optional(&mut **sql_tx)
    .await?;

    if let Some((address, matches)) = ambiguous {
        return Err(DataIntegrityError::AmbiguousAddress { address, matches }.into());
    }

    Ok(())
}

async fn ensure_unambiguous_asset_matches(
    sql_tx: &mut Transaction<'_, Sqlite>,
    base_asset_id: i64,
) -> Result<(), StoreError> {
    let ambiguous: Option<(String, i64)> = sqlx::query_as(
        r#"
        SELECT lower(a.contract_address), COUNT(*)
        FROM assets a
        WHERE lower(a.contract_address) IN (
            SELECT lower(t.token_address) FROM transfers t
            WHERE t.base_asset_id = ?1 AND t.asset_id IS NULL
        )
        GROUP BY lower(a.contract_address)
        HAVING COUNT(*) > 1
        LIMIT 1
        "#,
    )
    .bind(base_asset_id)
    .fetch_optional(&mut **sql_tx)
    .await?;

    if let Some((contract, matches)) = ambiguous {
        return Err(DataIntegrityError::AmbiguousAsset { contract, matches }.into());
    }

    Ok(())
}
