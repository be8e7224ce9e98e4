use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::status::AddressKind;

/// Canonical identity for a chain address. Created once per distinct raw
/// string; the backfill resolver matches against it case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub id: Option<i64>,
    pub address: String,
    pub kind: AddressKind,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: i64,
    address: String,
    kind: String,
    created_at: chrono::NaiveDateTime,
}

impl Address {
    pub fn new(address: impl Into<String>, kind: AddressKind) -> Self {
        Self {
            id: None,
            address: address.into(),
            kind,
            created_at: None,
        }
    }

    pub async fn insert(&self, pool: &SqlitePool) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO addresses (address, kind) VALUES (?1, ?2)")
            .bind(&self.address)
            .bind(self.kind.as_str())
            .execute(pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Case-insensitive lookup by raw string, the same match rule backfill
    /// applies.
    pub async fn find_by_string(
        pool: &SqlitePool,
        address: &str,
    ) -> Result<Option<Self>, StoreError> {
        let row: Option<AddressRow> = sqlx::query_as(
            "SELECT id, address, kind, created_at FROM addresses \
             WHERE address = ?1 COLLATE NOCASE",
        )
        .bind(address)
        .fetch_optional(pool)
        .await?;

        row.map(|row| {
            Ok(Self {
                id: Some(row.id),
                kind: row.kind.parse::<AddressKind>()?,
                address: row.address,
                created_at: Some(row.created_at.and_utc()),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[tokio::test]
    async fn insert_and_find_case_insensitive() {
        let pool = setup_test_db().await;

        let id = Address::new("0xAbCd000000000000000000000000000000000001", AddressKind::Eoa)
            .insert(&pool)
            .await
            .unwrap();
        assert!(id > 0);

        let found = Address::find_by_string(&pool, "0xABCD000000000000000000000000000000000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, Some(id));
        assert_eq!(found.kind, AddressKind::Eoa);
        // The stored casing is preserved, only comparison is folded.
        assert_eq!(found.address, "0xAbCd000000000000000000000000000000000001");
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let pool = setup_test_db().await;
        let found = Address::find_by_string(&pool, "0x0000000000000000000000000000000000000000")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn duplicate_exact_string_is_rejected() {
        let pool = setup_test_db().await;
        let addr = Address::new(
            "0xdddddddddddddddddddddddddddddddddddddddd",
            AddressKind::Contract,
        );
        addr.insert(&pool).await.unwrap();
        assert!(addr.insert(&pool).await.is_err());
    }
}
