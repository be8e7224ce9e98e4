use alloy::primitives::B256;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{DataIntegrityError, StoreError};
use crate::status::SwapStatus;

/// One raw DEX swap event row. Immutable after ingestion except for the
/// maker's resolved address id, which backfill fills once.
///
/// Linkage state is not a column here: a swap is reconciled iff a
/// `trade_swap_links` row references it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Swap {
    pub id: Option<i64>,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub maker: String,
    pub maker_address_id: Option<i64>,
    pub base_asset_id: i64,
    pub status: SwapStatus,
}

#[derive(sqlx::FromRow)]
pub(crate) struct SwapRow {
    id: i64,
    tx_hash: String,
    block_number: i64,
    log_index: i64,
    maker: String,
    maker_address_id: Option<i64>,
    base_asset_id: i64,
    status: String,
}

impl TryFrom<SwapRow> for Swap {
    type Error = DataIntegrityError;

    fn try_from(row: SwapRow) -> Result<Self, Self::Error> {
        let tx_hash = row
            .tx_hash
            .parse::<B256>()
            .map_err(|_| DataIntegrityError::MalformedTxHash(row.tx_hash.clone()))?;

        Ok(Self {
            id: Some(row.id),
            tx_hash,
            block_number: u64::try_from(row.block_number)?,
            log_index: u64::try_from(row.log_index)?,
            maker: row.maker,
            maker_address_id: row.maker_address_id,
            base_asset_id: row.base_asset_id,
            status: row.status.parse::<SwapStatus>()?,
        })
    }
}

impl Swap {
    pub async fn save_within_transaction(
        &self,
        sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<i64, StoreError> {
        let block_number = i64::try_from(self.block_number)?;
        let log_index = i64::try_from(self.log_index)?;

        let result = sqlx::query(
            r#"
            INSERT INTO swaps (tx_hash, block_number, log_index, maker, maker_address_id, base_asset_id, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(self.tx_hash.to_string())
        .bind(block_number)
        .bind(log_index)
        .bind(&self.maker)
        .bind(self.maker_address_id)
        .bind(self.base_asset_id)
        .bind(self.status.as_str())
        .execute(&mut **sql_tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[cfg(test)]
    pub(crate) async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Self, StoreError> {
        let row: SwapRow = sqlx::query_as(
            "SELECT id, tx_hash, block_number, log_index, maker, maker_address_id, \
             base_asset_id, status FROM swaps WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(Self::try_from(row)?)
    }

    /// Resolved maker id for one swap; used to verify write-once backfill.
    pub async fn maker_address_id(pool: &SqlitePool, id: i64) -> Result<Option<i64>, StoreError> {
        let resolved: Option<i64> =
            sqlx::query_scalar("SELECT maker_address_id FROM swaps WHERE id = ?1")
                .bind(id)
                .fetch_one(pool)
                .await?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SwapBuilder, setup_test_db, tx_hash};

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup_test_db().await;

        let id = SwapBuilder::new()
            .with_tx_hash(tx_hash(0x42))
            .with_block(1234)
            .with_log_index(7)
            .save(&pool)
            .await;

        let found = Swap::find_by_id(&pool, id).await.unwrap();
        assert_eq!(found.tx_hash, tx_hash(0x42));
        assert_eq!(found.block_number, 1234);
        assert_eq!(found.log_index, 7);
        assert_eq!(found.status, SwapStatus::Success);
        assert_eq!(found.maker_address_id, None);
    }

    #[tokio::test]
    async fn duplicate_tx_hash_and_log_index_rejected() {
        let pool = setup_test_db().await;

        SwapBuilder::new().with_tx_hash(tx_hash(0x01)).save(&pool).await;

        let mut sql_tx = pool.begin().await.unwrap();
        let dup = SwapBuilder::new().with_tx_hash(tx_hash(0x01)).build();
        let result = dup.save_within_transaction(&mut sql_tx).await;
        assert!(result.is_err());
        sql_tx.rollback().await.unwrap();
    }
}
