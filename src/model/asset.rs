use sqlx::SqlitePool;

use crate::error::StoreError;

/// Canonical token identity, keyed by contract address string. Created by
/// the ingestion service; this pipeline references it read-mostly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: Option<i64>,
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: i64,
    contract_address: String,
    symbol: String,
    name: String,
    decimals: i64,
}

impl Asset {
    pub async fn insert(&self, pool: &SqlitePool) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO assets (contract_address, symbol, name, decimals) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&self.contract_address)
        .bind(&self.symbol)
        .bind(&self.name)
        .bind(i64::from(self.decimals))
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn find_by_contract(
        pool: &SqlitePool,
        contract_address: &str,
    ) -> Result<Option<Self>, StoreError> {
        let row: Option<AssetRow> = sqlx::query_as(
            "SELECT id, contract_address, symbol, name, decimals FROM assets \
             WHERE contract_address = ?1 COLLATE NOCASE",
        )
        .bind(contract_address)
        .fetch_optional(pool)
        .await?;

        row.map(|row| {
            Ok(Self {
                id: Some(row.id),
                contract_address: row.contract_address,
                symbol: row.symbol,
                name: row.name,
                decimals: u8::try_from(row.decimals)?,
            })
        })
        .transpose()
    }
}
