use alloy::primitives::{B256, I256};

use crate::error::StoreError;

/// One ERC20-style value movement inside a transaction. The raw sender,
/// recipient, and token strings are kept exactly as the chain event emitted
/// them; the three resolved-id columns start NULL and are filled once by
/// backfill, never overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: Option<i64>,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub sender: String,
    pub sender_address_id: Option<i64>,
    pub recipient: String,
    pub recipient_address_id: Option<i64>,
    pub token_address: String,
    pub asset_id: Option<i64>,
    /// Raw integer token units, signed.
    pub amount: I256,
    pub base_asset_id: i64,
}

impl Transfer {
    pub async fn save_within_transaction(
        &self,
        sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<i64, StoreError> {
        let block_number = i64::try_from(self.block_number)?;
        let log_index = i64::try_from(self.log_index)?;

        let result = sqlx::query(
            r#"
            INSERT INTO transfers (
                tx_hash, block_number, log_index,
                sender, sender_address_id,
                recipient, recipient_address_id,
                token_address, asset_id,
                amount, base_asset_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(self.tx_hash.to_string())
        .bind(block_number)
        .bind(log_index)
        .bind(&self.sender)
        .bind(self.sender_address_id)
        .bind(&self.recipient)
        .bind(self.recipient_address_id)
        .bind(&self.token_address)
        .bind(self.asset_id)
        .bind(self.amount.to_string())
        .bind(self.base_asset_id)
        .execute(&mut **sql_tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Resolved ids for one transfer as (sender, recipient, asset); used to
    /// verify backfill's write-once contract.
    pub async fn resolved_ids(
        pool: &sqlx::SqlitePool,
        id: i64,
    ) -> Result<(Option<i64>, Option<i64>, Option<i64>), StoreError> {
        let ids: (Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT sender_address_id, recipient_address_id, asset_id \
             FROM transfers WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(ids)
    }
}
