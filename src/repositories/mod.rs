//! # Database Repository Layer
//!
//! SQL for the PostgreSQL store, one module per concern:
//!
//! - [`cursor`] - forward and backfill progress markers
//! - [`verified_contract`] - the well-known contract registry
//! - [`block_batch`] - per-block insertion of parsed records
//!
//! Functions take a pool or an open transaction so the caller decides atomicity.

pub mod block_batch;
pub mod cursor;
pub mod verified_contract;
