//! Trade-swap linkage: which swaps still need a trade derived, and the
//! association rows that make reconciliation progress durable. Per swap the
//! state machine is Unlinked -> Linked on `create`; only the administrative
//! `remove` moves a swap back, after which it reappears as a candidate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::error::{DataIntegrityError, PreconditionError, StoreError};
use crate::model::Swap;
use crate::model::swap::SwapRow;

/// Association row recording that a swap has been consumed into a trade.
/// One trade may subsume multiple swaps, so uniqueness is on the pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSwapLink {
    pub id: Option<i64>,
    pub trade_id: i64,
    pub swap_id: i64,
    /// How much of the swap's volume this trade consumed, when the deriver
    /// records it.
    pub contributed_amount: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: i64,
    trade_id: i64,
    swap_id: i64,
    contributed_amount: Option<String>,
    created_at: chrono::NaiveDateTime,
}

impl TryFrom<LinkRow> for TradeSwapLink {
    type Error = DataIntegrityError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let contributed_amount = row
            .contributed_amount
            .as_deref()
            .map(|value| {
                value
                    .parse::<Decimal>()
                    .map_err(|_| DataIntegrityError::MalformedContribution {
                        trade_id: row.trade_id,
                        swap_id: row.swap_id,
                        value: value.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            id: Some(row.id),
            trade_id: row.trade_id,
            swap_id: row.swap_id,
            contributed_amount,
            created_at: Some(row.created_at.and_utc()),
        })
    }
}

/// Swaps for the base asset with no link row, block ascending — the
/// oldest-first candidate set for trade derivation, so a re-run after a
/// crash picks up near where the backlog was left.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn find_missing_trades_from_swaps(
    pool: &SqlitePool,
    base_asset_id: i64,
) -> Result<Vec<Swap>, StoreError> {
    let rows: Vec<SwapRow> = sqlx::query_as(
        r#"
        SELECT s.id, s.tx_hash, s.block_number, s.log_index, s.maker,
               s.maker_address_id, s.base_asset_id, s.status
        FROM swaps s
        LEFT JOIN trade_swap_links l ON l.swap_id = s.id
        WHERE s.base_asset_id = ?1 AND l.id IS NULL
        ORDER BY s.block_number ASC, s.log_index ASC
        "#,
    )
    .bind(base_asset_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| Swap::try_from(row).map_err(StoreError::from))
        .collect()
}

impl TradeSwapLink {
    pub const fn new(trade_id: i64, swap_id: i64, contributed_amount: Option<Decimal>) -> Self {
        Self {
            id: None,
            trade_id,
            swap_id,
            contributed_amount,
            created_at: None,
        }
    }

    /// Marks the swap consumed. Rejects non-positive ids before touching
    /// the store.
    #[tracing::instrument(skip(pool, self), fields(trade_id = self.trade_id, swap_id = self.swap_id), level = tracing::Level::INFO)]
    pub async fn create(&self, pool: &SqlitePool) -> Result<i64, StoreError> {
        validate_ids(self.trade_id, self.swap_id)?;

        let mut sql_tx = pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO trade_swap_links (trade_id, swap_id, contributed_amount)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(self.trade_id)
        .bind(self.swap_id)
        .bind(self.contributed_amount.map(|amount| amount.to_string()))
        .execute(&mut *sql_tx)
        .await?;
        sql_tx.commit().await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find(
        pool: &SqlitePool,
        trade_id: i64,
        swap_id: i64,
    ) -> Result<Option<Self>, StoreError> {
        validate_ids(trade_id, swap_id)?;

        let row: Option<LinkRow> = sqlx::query_as(
            "SELECT id, trade_id, swap_id, contributed_amount, created_at \
             FROM trade_swap_links WHERE trade_id = ?1 AND swap_id = ?2",
        )
        .bind(trade_id)
        .bind(swap_id)
        .fetch_optional(pool)
        .await?;

        row.map(|row| Self::try_from(row).map_err(StoreError::from))
            .transpose()
    }

    /// Listing for operational tooling; either filter may be omitted.
    pub async fn list(
        pool: &SqlitePool,
        trade_id: Option<i64>,
        swap_id: Option<i64>,
    ) -> Result<Vec<Self>, StoreError> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT id, trade_id, swap_id, contributed_amount, created_at \
             FROM trade_swap_links WHERE 1 = 1",
        );
        if let Some(trade_id) = trade_id {
            builder.push(" AND trade_id = ");
            builder.push_bind(trade_id);
        }
        if let Some(swap_id) = swap_id {
            builder.push(" AND swap_id = ");
            builder.push_bind(swap_id);
        }
        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows: Vec<LinkRow> = builder.build_query_as().fetch_all(pool).await?;

        rows.into_iter()
            .map(|row| Self::try_from(row).map_err(StoreError::from))
            .collect()
    }

    /// Administrative correction: unlinks the swap so it reappears in the
    /// candidate set. Returns whether a row was actually removed.
    #[tracing::instrument(skip(pool), level = tracing::Level::INFO)]
    pub async fn remove(
        pool: &SqlitePool,
        trade_id: i64,
        swap_id: i64,
    ) -> Result<bool, StoreError> {
        validate_ids(trade_id, swap_id)?;

        let mut sql_tx = pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM trade_swap_links WHERE trade_id = ?1 AND swap_id = ?2",
        )
        .bind(trade_id)
        .bind(swap_id)
        .execute(&mut *sql_tx)
        .await?;
        sql_tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}

fn validate_ids(trade_id: i64, swap_id: i64) -> Result<(), PreconditionError> {
    if trade_id <= 0 {
        return Err(PreconditionError::InvalidTradeId(trade_id));
    }
    if swap_id <= 0 {
        return Err(PreconditionError::InvalidSwapId(swap_id));
    }
    Ok(())
}
