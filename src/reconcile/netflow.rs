//! Net transfer aggregation: collapses the raw transfer legs of a
//! transaction into signed net custody deltas per (address, asset). This is
//! the building block a trade deriver uses when a single swap event's
//! fields are insufficient, e.g. routed multi-hop swaps whose economically
//! relevant movement spans several legs.
//!
//! Amounts are raw integer token units; summation runs over 256-bit signed
//! integers so no precision is ever lost. Positive means net inflow to the
//! address. A net of exactly zero (a pure pass-through wallet) is a valid
//! result row, not "no data".

use std::collections::BTreeMap;

use alloy::primitives::{B256, I256};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{DataIntegrityError, StoreError};

/// Canonical asset metadata joined onto a net transfer row. Absent when the
/// leg's token contract has not been resolved to an asset yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInfo {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Signed net custody change for one (transaction, address, asset) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetTransfer {
    pub tx_hash: B256,
    /// Lowercase-normalized address string.
    pub address: String,
    /// Lowercase-normalized token contract string.
    pub token_address: String,
    pub asset: Option<AssetInfo>,
    /// Positive = net inflow, negative = net outflow.
    #[serde(serialize_with = "serialize_amount")]
    pub amount: I256,
}

fn serialize_amount<S: serde::Serializer>(amount: &I256, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&amount.to_string())
}

#[derive(sqlx::FromRow)]
struct LegRow {
    tx_hash: String,
    sender: String,
    recipient: String,
    token_address: String,
    amount: String,
    asset_id: Option<i64>,
    asset_symbol: Option<String>,
    asset_name: Option<String>,
    asset_decimals: Option<i64>,
}

impl LegRow {
    fn asset_info(&self) -> Result<Option<AssetInfo>, StoreError> {
        let (Some(id), Some(symbol), Some(name), Some(decimals)) = (
            self.asset_id,
            self.asset_symbol.as_ref(),
            self.asset_name.as_ref(),
            self.asset_decimals,
        ) else {
            return Ok(None);
        };

        Ok(Some(AssetInfo {
            id,
            symbol: symbol.clone(),
            name: name.clone(),
            decimals: u8::try_from(decimals)?,
        }))
    }
}

const LEG_QUERY: &str = r#"
    SELECT t.tx_hash, t.sender, t.recipient, t.token_address, t.amount,
           a.id AS asset_id, a.symbol AS asset_symbol,
           a.name AS asset_name, a.decimals AS asset_decimals
    FROM transfers t
    LEFT JOIN assets a ON a.id = t.asset_id
"#;

/// Net per-asset deltas for one address within one transaction. The address
/// comparison is case-insensitive, matching the backfill resolution rule.
#[tracing::instrument(skip(pool), level = tracing::Level::DEBUG)]
pub async fn net_transfers_for_tx(
    pool: &SqlitePool,
    tx_hash: B256,
    address: &str,
    base_asset_id: i64,
) -> Result<Vec<NetTransfer>, StoreError> {
    let sql = format!(
        "{LEG_QUERY} WHERE t.base_asset_id = ?1 AND t.tx_hash = ?2 \
         AND (t.sender = ?3 COLLATE NOCASE OR t.recipient = ?3 COLLATE NOCASE) \
         ORDER BY t.log_index ASC"
    );

    let legs: Vec<LegRow> = sqlx::query_as(&sql)
        .bind(base_asset_id)
        .bind(tx_hash.to_string())
        .bind(address)
        .fetch_all(pool)
        .await?;

    let wanted = address.to_lowercase();
    let nets = aggregate_legs(&legs)?;

    nets.into_iter()
        .filter(|((_, addr, _), _)| *addr == wanted)
        .map(into_net_transfer)
        .collect()
}

/// The batched form: one round trip for a whole backlog of transactions,
/// one result row per (tx_hash, address, asset) over every participating
/// address. An empty hash set is a no-op, not an error.
#[tracing::instrument(skip(pool, tx_hashes), fields(txns = tx_hashes.len()), level = tracing::Level::DEBUG)]
pub async fn net_transfers_for_tx_set(
    pool: &SqlitePool,
    tx_hashes: &[B256],
    base_asset_id: i64,
) -> Result<Vec<NetTransfer>, StoreError> {
    if tx_hashes.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new(LEG_QUERY);
    builder.push(" WHERE t.base_asset_id = ");
    builder.push_bind(base_asset_id);
    builder.push(" AND t.tx_hash IN (");
    let mut hashes = builder.separated(", ");
    for hash in tx_hashes {
        hashes.push_bind(hash.to_string());
    }
    hashes.push_unseparated(")");
    builder.push(" ORDER BY t.tx_hash ASC, t.log_index ASC");

    let legs: Vec<LegRow> = builder.build_query_as().fetch_all(pool).await?;

    aggregate_legs(&legs)?
        .into_iter()
        .map(into_net_transfer)
        .collect()
}

type NetKey = (String, String, String);

/// Row-wise union of the "received" (+amount, grouped by recipient) and
/// "sent" (-amount, grouped by sender) sets, so an address acting as both
/// sides of the same transaction nets to a single signed value.
fn aggregate_legs(
    legs: &[LegRow],
) -> Result<BTreeMap<NetKey, (Option<AssetInfo>, I256)>, StoreError> {
    let mut nets: BTreeMap<NetKey, (Option<AssetInfo>, I256)> = BTreeMap::new();

    for leg in legs {
        let amount = I256::from_dec_str(leg.amount.trim()).map_err(|_| {
            DataIntegrityError::MalformedAmount {
                tx_hash: leg.tx_hash.clone(),
                value: leg.amount.clone(),
            }
        })?;
        let outflow = amount
            .checked_neg()
            .ok_or_else(|| overflow_error(leg))?;

        accumulate(&mut nets, leg, leg.recipient.to_lowercase(), amount)?;
        accumulate(&mut nets, leg, leg.sender.to_lowercase(), outflow)?;
    }

    Ok(nets)
}

fn accumulate(
    nets: &mut BTreeMap<NetKey, (Option<AssetInfo>, I256)>,
    leg: &LegRow,
    address: String,
    delta: I256,
) -> Result<(), StoreError> {
    let key = (
        leg.tx_hash.to_lowercase(),
        address,
        leg.token_address.to_lowercase(),
    );

    let entry = match nets.entry(key) {
        std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
        std::collections::btree_map::Entry::Vacant(entry) => {
            entry.insert((leg.asset_info()?, I256::ZERO))
        }
    };

    entry.1 = entry
        .1
        .checked_add(delta)
        .ok_or_else(|| overflow_error(leg))?;

    Ok(())
}

fn overflow_error(leg: &LegRow) -> StoreError {
    DataIntegrityError::AmountOverflow {
        tx_hash: leg.tx_hash.clone(),
        token: leg.token_address.clone(),
    }
    .into()
}

fn into_net_transfer(
    ((tx_hash, address, token_address), (asset, amount)): (NetKey, (Option<AssetInfo>, I256)),
) -> Result<NetTransfer, StoreError> {
    let parsed = tx_hash
        .parse::<B256>()
        .map_err(|_| StoreError::from(DataIntegrityError::MalformedTxHash(tx_hash)))?;

    Ok(NetTransfer {
        tx_hash: parsed,
        address,
        token_address,
        asset,
        amount,
    })
}
