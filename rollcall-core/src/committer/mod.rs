//! Batch committer: the durable consumer of the event log.
//!
//! Each instance is a member of a named consumer group. An iteration claims
//! a bounded batch, resolves display names with one lookup, upserts the
//! deduplicated records in one transaction and acknowledges the batch only
//! after the commit. Any failure before the acknowledgement leaves the batch
//! pending; the instance re-reads its own backlog before claiming anything
//! new, so the same entries are retried.

pub mod batch;

use std::{sync::Arc, time::Duration};

use chrono::{FixedOffset, Local, Offset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    domain::{Delivery, UNKNOWN_DISPLAY_NAME},
    error::{PipelineError, Result},
    log::{ClaimFrom, ClaimRequest, EventLog},
    retry::RetryPolicy,
    store::AttendanceStore,
};

pub use batch::{ClaimedBatch, build_records};

#[derive(Debug, Clone)]
pub struct CommitterConfig {
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    /// Longest wait for new entries in one claim.
    pub claim_block: Duration,
    /// Pending entries idle for longer than this are taken over from other
    /// consumers of the group.
    pub reclaim_idle: Duration,
    /// Offset in which capture instants are split into date and time.
    pub record_offset: FixedOffset,
    pub unknown_name: String,
    pub retry: RetryPolicy,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            group: "attendance_group".to_string(),
            consumer: "committer-1".to_string(),
            batch_size: 10,
            claim_block: Duration::from_secs(10),
            reclaim_idle: Duration::from_secs(60),
            record_offset: host_offset(),
            unknown_name: UNKNOWN_DISPLAY_NAME.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// The host's current UTC offset.
pub fn host_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Result of one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub malformed: usize,
    pub records: usize,
    pub acknowledged: u64,
}

pub struct BatchCommitter {
    log: Arc<dyn EventLog>,
    store: Arc<dyn AttendanceStore>,
    config: CommitterConfig,
    group_ready: bool,
    backlog_pending: bool,
}

impl std::fmt::Debug for BatchCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCommitter")
            .field("config", &self.config)
            .field("group_ready", &self.group_ready)
            .field("backlog_pending", &self.backlog_pending)
            .finish()
    }
}

impl BatchCommitter {
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn AttendanceStore>,
        config: CommitterConfig,
    ) -> Self {
        Self {
            log,
            store,
            config,
            group_ready: false,
            // A restarted consumer may still own entries from its last run.
            backlog_pending: true,
        }
    }

    pub fn config(&self) -> &CommitterConfig {
        &self.config
    }

    /// Run until `cancel` fires. Transient failures are retried with backoff;
    /// the loop only ends on cancellation. A batch already claimed when the
    /// token fires is still committed and acknowledged.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            batch_size = self.config.batch_size,
            "Batch committer started"
        );

        let mut backoff = self.config.retry.backoff();
        while !cancel.is_cancelled() {
            match self.process_once(&cancel).await {
                Ok(outcome) => {
                    backoff.reset();
                    if outcome.claimed > 0 {
                        info!(
                            consumer = %self.config.consumer,
                            claimed = outcome.claimed,
                            records = outcome.records,
                            malformed = outcome.malformed,
                            acknowledged = outcome.acknowledged,
                            "Batch committed"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        consumer = %self.config.consumer,
                        attempt = backoff.attempt() + 1,
                        error = %err,
                        "Batch abandoned; entries stay pending"
                    );
                    if let PipelineError::Log(log_err) = &err
                        && log_err.is_transient()
                    {
                        self.reconnect_log().await;
                    }
                    if !backoff.wait(&cancel).await {
                        break;
                    }
                }
            }
        }

        info!(consumer = %self.config.consumer, "Batch committer stopped");
    }

    /// One claim-resolve-commit-acknowledge iteration. Cancellation only
    /// interrupts the wait for new entries.
    pub async fn process_once(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let result = self.try_process(cancel).await;
        if let Err(err) = &result {
            self.backlog_pending = true;
            if matches!(err, PipelineError::Log(_)) {
                self.group_ready = false;
            }
        }
        result
    }

    async fn try_process(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        if !self.group_ready {
            self.log.ensure_group(&self.config.group).await?;
            self.group_ready = true;
        }

        let batch = ClaimedBatch::from_deliveries(self.claim(cancel).await?);
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        for entry in &batch.malformed {
            warn!(
                entry_id = %entry.id,
                fields = ?entry.fields,
                reason = %entry.reason,
                "Skipping malformed log entry"
            );
        }

        let names = if batch.events.is_empty() {
            Default::default()
        } else {
            self.store.resolve_names(&batch.distinct_rolls()).await?
        };

        let records = build_records(
            &batch.events,
            &names,
            self.config.record_offset,
            &self.config.unknown_name,
        );
        if !records.is_empty() {
            self.store.upsert_batch(&records).await?;
        }

        let ids = batch.ids();
        let acknowledged =
            self.log.acknowledge(&self.config.group, &ids).await?;
        if acknowledged < ids.len() as u64 {
            debug!(
                expected = ids.len(),
                acknowledged,
                "Some entries were no longer pending"
            );
        }

        Ok(BatchOutcome {
            claimed: batch.len(),
            malformed: batch.malformed.len(),
            records: records.len(),
            acknowledged,
        })
    }

    /// Own backlog first, then idle entries of other consumers, then new
    /// entries.
    async fn claim(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Delivery>> {
        let mut request = ClaimRequest {
            group: self.config.group.clone(),
            consumer: self.config.consumer.clone(),
            count: self.config.batch_size,
            from: ClaimFrom::Backlog,
            block: self.config.claim_block,
        };

        if self.backlog_pending {
            let backlog = self.log.claim(&request).await?;
            if !backlog.is_empty() {
                debug!(count = backlog.len(), "Re-delivering own backlog");
                return Ok(backlog);
            }
            self.backlog_pending = false;
        }

        let reclaimed = self
            .log
            .reclaim_idle(
                &self.config.group,
                &self.config.consumer,
                self.config.reclaim_idle,
                self.config.batch_size,
            )
            .await?;
        if !reclaimed.is_empty() {
            info!(
                consumer = %self.config.consumer,
                count = reclaimed.len(),
                "Reclaimed idle entries from another consumer"
            );
            return Ok(reclaimed);
        }

        request.from = ClaimFrom::New;
        tokio::select! {
            _ = cancel.cancelled() => Ok(Vec::new()),
            claimed = self.log.claim(&request) => Ok(claimed?),
        }
    }

    async fn reconnect_log(&self) {
        match self.log.reconnect().await {
            Ok(()) => {
                info!(consumer = %self.config.consumer, "Event log reconnected")
            }
            Err(err) => warn!(
                consumer = %self.config.consumer,
                error = %err,
                "Event log reconnect failed"
            ),
        }
    }
}
