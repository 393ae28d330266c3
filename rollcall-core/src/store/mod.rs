//! Relational system of record.
//!
//! The store holds the reference dataset (students and their display names)
//! and the deduplicated attendance records written by the batch committer.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    domain::{AttendanceRecord, RollNumber},
    error::StoreError,
};

pub use memory::MemoryAttendanceStore;
pub use postgres::{PoolSettings, PostgresAttendanceStore};

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Single batched lookup of display names. Rolls with no reference row
    /// are absent from the returned map.
    async fn resolve_names(
        &self,
        rolls: &[RollNumber],
    ) -> Result<HashMap<RollNumber, String>, StoreError>;

    /// Upsert all records in one transaction. Records must have distinct
    /// identities; an existing row for an identity gets its name and time
    /// replaced.
    async fn upsert_batch(
        &self,
        records: &[AttendanceRecord],
    ) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
