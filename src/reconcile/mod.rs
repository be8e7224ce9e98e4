//! The reconciliation subsystem: gap detection, identity backfill, net
//! transfer aggregation, trade-swap linkage, and the per-base-asset lease
//! that serializes runs.

pub mod backfill;
pub mod gap;
pub mod lease;
pub mod linker;
pub mod netflow;
