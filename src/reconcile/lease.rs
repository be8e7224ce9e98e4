//! Per-base-asset reconciliation lease. Two concurrent runs over the same
//! base asset could both observe a swap as unlinked and derive its trade
//! twice; runs must therefore hold this lease for the duration of a pass.
//! Stale leases from crashed runs expire after a TTL.

use tracing::{info, warn};

use crate::error::StoreError;

pub const DEFAULT_LEASE_TTL_MINUTES: u32 = 5;

/// Atomically acquires the reconciliation lease for the base asset.
/// Returns true if the lease was acquired, false if another run holds it.
pub async fn try_acquire_reconcile_lease(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    base_asset_id: i64,
    ttl_minutes: u32,
) -> Result<bool, StoreError> {
    // Expire a stale lease for this specific base asset first.
    let timeout_param = format!("-{ttl_minutes} minutes");
    let cleanup = sqlx::query(
        "DELETE FROM base_asset_leases \
         WHERE base_asset_id = ?1 AND locked_at < datetime('now', ?2)",
    )
    .bind(base_asset_id)
    .bind(timeout_param)
    .execute(&mut **sql_tx)
    .await?;

    if cleanup.rows_affected() > 0 {
        info!(
            "Expired {} stale lease(s) older than {ttl_minutes} minutes for base asset {base_asset_id}",
            cleanup.rows_affected()
        );
    }

    let result =
        sqlx::query("INSERT OR IGNORE INTO base_asset_leases (base_asset_id) VALUES (?1)")
            .bind(base_asset_id)
            .execute(&mut **sql_tx)
            .await?;

    let acquired = result.rows_affected() > 0;
    if acquired {
        info!("Acquired reconciliation lease for base asset {base_asset_id}");
    } else {
        warn!("Reconciliation lease for base asset {base_asset_id} already held");
    }

    Ok(acquired)
}

/// Releases the lease at the end of a run.
pub async fn release_reconcile_lease(
    sql_tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    base_asset_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM base_asset_leases WHERE base_asset_id = ?1")
        .bind(base_asset_id)
        .execute(&mut **sql_tx)
        .await?;

    if result.rows_affected() > 0 {
        info!("Released reconciliation lease for base asset {base_asset_id}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[tokio::test]
    async fn lease_acquire_succeeds_when_free() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        let acquired = try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
            .await
            .unwrap();
        assert!(acquired);
        sql_tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn second_acquire_for_same_base_asset_fails() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            !try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn different_base_assets_hold_independent_leases() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 2, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn released_lease_can_be_reacquired() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        release_reconcile_lease(&mut sql_tx, 1).await.unwrap();
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn stale_lease_expires_after_ttl() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();

        // Backdate the lease past the TTL.
        sqlx::query(
            "UPDATE base_asset_leases SET locked_at = datetime('now', '-100 minutes') \
             WHERE base_asset_id = 1",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn expiry_only_touches_the_requested_base_asset() {
        let pool = setup_test_db().await;

        let mut sql_tx = pool.begin().await.unwrap();
        for base_asset in [1i64, 2, 3] {
            sqlx::query(
                "INSERT INTO base_asset_leases (base_asset_id, locked_at) \
                 VALUES (?1, datetime('now', '-100 minutes'))",
            )
            .bind(base_asset)
            .execute(&mut *sql_tx)
            .await
            .unwrap();
        }
        sql_tx.commit().await.unwrap();

        let mut sql_tx = pool.begin().await.unwrap();
        assert!(
            try_acquire_reconcile_lease(&mut sql_tx, 1, DEFAULT_LEASE_TTL_MINUTES)
                .await
                .unwrap()
        );
        sql_tx.commit().await.unwrap();

        let remaining: Vec<i64> = sqlx::query_scalar(
            "SELECT base_asset_id FROM base_asset_leases ORDER BY base_asset_id",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(remaining, vec![1, 2, 3]);
    }
}
