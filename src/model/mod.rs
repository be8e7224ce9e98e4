//! Row types for the slice of the indexer schema the reconciliation
//! pipeline reads and writes. Full CRUD for these entities lives in the
//! ingestion service; only what gap detection, backfill, and linkage need
//! is carried here.

mod address;
mod asset;
pub(crate) mod swap;
mod trade;
mod transfer;

pub use address::Address;
pub use asset::Asset;
pub use swap::Swap;
pub use trade::Trade;
pub use transfer::Transfer;
