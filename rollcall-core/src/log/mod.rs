//! Durable event log port.
//!
//! The log is an append-only, ordered record of [`AttendanceEvent`]s with
//! consumer groups whose pending-entry lists are owned by the log itself.
//! Application code never edits group state directly: it only claims,
//! acknowledges and reclaims through this trait.

pub mod codec;
pub mod memory;
pub mod redis_stream;

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{AttendanceEvent, Delivery, EntryId},
    error::LogError,
};

pub use memory::MemoryEventLog;
pub use redis_stream::{RedisEventLog, StreamSettings};

/// Which slice of a consumer group a claim reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFrom {
    /// Entries already delivered to this consumer and still unacknowledged.
    /// Never blocks.
    Backlog,
    /// Entries never delivered to any consumer of the group.
    New,
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub group: String,
    pub consumer: String,
    pub count: usize,
    pub from: ClaimFrom,
    /// Upper bound on how long a `New` claim waits for entries.
    pub block: Duration,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event; returns once the log has acknowledged the write.
    /// Oldest entries are trimmed approximately beyond the log's capacity.
    async fn append(
        &self,
        event: &AttendanceEvent,
    ) -> Result<EntryId, LogError>;

    /// Create the consumer group (and the log) if missing. Idempotent.
    async fn ensure_group(&self, group: &str) -> Result<(), LogError>;

    async fn claim(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<Delivery>, LogError>;

    /// Transfer entries pending longer than `min_idle` (held by any consumer
    /// of the group) to `consumer`.
    async fn reclaim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, LogError>;

    /// Remove entries from the group's pending list. Returns how many were
    /// actually pending.
    async fn acknowledge(
        &self,
        group: &str,
        ids: &[EntryId],
    ) -> Result<u64, LogError>;

    /// Id of the newest entry, `None` when the log is empty.
    async fn last_id(&self) -> Result<Option<EntryId>, LogError>;

    /// Read entries strictly after `after` outside any consumer group,
    /// waiting up to `block` for the first one.
    async fn read_after(
        &self,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, LogError>;

    async fn ping(&self) -> Result<(), LogError>;

    /// Replace the underlying connection.
    async fn reconnect(&self) -> Result<(), LogError>;
}
