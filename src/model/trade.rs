use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Derived economic record. Trades are built by a downstream deriver; this
/// pipeline only needs enough of the row to give link rows a real foreign
/// key.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: Option<i64>,
    pub base_asset_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub const fn new(base_asset_id: i64) -> Self {
        Self {
            id: None,
            base_asset_id,
            created_at: None,
        }
    }

    pub async fn save_within_transaction(
        &self,
        sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO trades (base_asset_id) VALUES (?1)")
            .bind(self.base_asset_id)
            .execute(&mut **sql_tx)
            .await?;

        Ok(result.last_insert_rowid())
    }
}
