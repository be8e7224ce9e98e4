//! Shared test fixtures: in-memory database setup and builders for raw
//! swap and transfer rows.

use alloy::primitives::B256;
use sqlx::SqlitePool;

use crate::model::{Swap, Trade};
use crate::reconcile::linker::TradeSwapLink;
use crate::status::SwapStatus;

/// In-memory SQLite database with all migrations applied.
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Deterministic transaction hash from a one-byte tag.
pub(crate) fn tx_hash(tag: u8) -> B256 {
    B256::repeat_byte(tag)
}

/// Builder for raw swap rows with sensible defaults.
pub(crate) struct SwapBuilder {
    swap: Swap,
}

impl SwapBuilder {
    pub(crate) fn new() -> Self {
        Self {
            swap: Swap {
                id: None,
                tx_hash: tx_hash(0x01),
                block_number: 100,
                log_index: 0,
                maker: "0x1111111111111111111111111111111111111111".to_string(),
                maker_address_id: None,
                base_asset_id: 1,
                status: SwapStatus::Success,
            },
        }
    }

    pub(crate) fn with_tx_hash(mut self, hash: B256) -> Self {
        self.swap.tx_hash = hash;
        self
    }

    pub(crate) fn with_block(mut self, block_number: u64) -> Self {
        self.swap.block_number = block_number;
        self
    }

    pub(crate) fn with_log_index(mut self, log_index: u64) -> Self {
        self.swap.log_index = log_index;
        self
    }

    pub(crate) fn with_maker(mut self, maker: impl Into<String>) -> Self {
        self.swap.maker = maker.into();
        self
    }

    pub(crate) fn with_base_asset(mut self, base_asset_id: i64) -> Self {
        self.swap.base_asset_id = base_asset_id;
        self
    }

    pub(crate) fn with_status(mut self, status: SwapStatus) -> Self {
        self.swap.status = status;
        self
    }

    pub(crate) fn build(self) -> Swap {
        self.swap
    }

    pub(crate) async fn save(self, pool: &SqlitePool) -> i64 {
        let mut sql_tx = pool.begin().await.unwrap();
        let id = self
            .swap
            .save_within_transaction(&mut sql_tx)
            .await
            .unwrap();
        sql_tx.commit().await.unwrap();
        id
    }
}

/// Builder for raw transfer rows. Amounts are kept as strings so tests can
/// also exercise malformed store contents.
pub(crate) struct TransferBuilder {
    tx_hash: B256,
    block_number: u64,
    log_index: u64,
    sender: String,
    recipient: String,
    token_address: String,
    asset_id: Option<i64>,
    amount: String,
    base_asset_id: i64,
}

impl TransferBuilder {
    pub(crate) fn new() -> Self {
        Self {
            tx_hash: tx_hash(0x01),
            block_number: 100,
            log_index: 0,
            sender: "0x2222222222222222222222222222222222222222".to_string(),
            recipient: "0x3333333333333333333333333333333333333333".to_string(),
            token_address: "0x4444444444444444444444444444444444444444".to_string(),
            asset_id: None,
            amount: "1".to_string(),
            base_asset_id: 1,
        }
    }

    pub(crate) fn with_tx_hash(mut self, hash: B256) -> Self {
        self.tx_hash = hash;
        self
    }

    pub(crate) fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub(crate) fn with_log_index(mut self, log_index: u64) -> Self {
        self.log_index = log_index;
        self
    }

    pub(crate) fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub(crate) fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    pub(crate) fn with_token(mut self, token_address: impl Into<String>) -> Self {
        self.token_address = token_address.into();
        self
    }

    pub(crate) fn with_asset_id(mut self, asset_id: i64) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    pub(crate) fn with_amount(self, amount: &str) -> Self {
        debug_assert!(
            alloy::primitives::I256::from_dec_str(amount).is_ok(),
            "test amount should be a decimal integer"
        );
        self.with_amount_raw(amount)
    }

    /// Stores the string verbatim, bypassing validation, for tests that
    /// need corrupt rows.
    pub(crate) fn with_amount_raw(mut self, amount: &str) -> Self {
        self.amount = amount.to_string();
        self
    }

    pub(crate) fn with_base_asset(mut self, base_asset_id: i64) -> Self {
        self.base_asset_id = base_asset_id;
        self
    }

    pub(crate) async fn save(self, pool: &SqlitePool) -> i64 {
        let result = sqlx::query(
            r#"
            INSERT INTO transfers (
                tx_hash, block_number, log_index,
                sender, recipient, token_address, asset_id,
                amount, base_asset_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(self.tx_hash.to_string())
        .bind(i64::try_from(self.block_number).unwrap())
        .bind(i64::try_from(self.log_index).unwrap())
        .bind(&self.sender)
        .bind(&self.recipient)
        .bind(&self.token_address)
        .bind(self.asset_id)
        .bind(&self.amount)
        .bind(self.base_asset_id)
        .execute(pool)
        .await
        .unwrap();

        result.last_insert_rowid()
    }
}

/// Creates a trade for the base asset and links the swap to it, returning
/// the trade id.
pub(crate) async fn link_swap_to_new_trade(
    pool: &SqlitePool,
    swap_id: i64,
    base_asset_id: i64,
) -> i64 {
    let mut sql_tx = pool.begin().await.unwrap();
    let trade_id = Trade::new(base_asset_id)
        .save_within_transaction(&mut sql_tx)
        .await
        .unwrap();
    sql_tx.commit().await.unwrap();

    TradeSwapLink::new(trade_id, swap_id, None)
        .create(pool)
        .await
        .unwrap();

    trade_id
}
