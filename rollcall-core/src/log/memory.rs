use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use super::{ClaimFrom, ClaimRequest, EventLog, codec};
use crate::{
    domain::{AttendanceEvent, Delivery, EntryId},
    error::LogError,
};

type Fields = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, Pending>,
}

#[derive(Debug, Default)]
struct LogState {
    entries: BTreeMap<EntryId, Fields>,
    groups: HashMap<String, GroupState>,
    last_generated: EntryId,
}

impl LogState {
    fn next_id(&mut self) -> EntryId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let last = self.last_generated;
        let id = if now > last.millis() {
            EntryId::new(now, 0)
        } else {
            EntryId::new(last.millis(), last.sequence() + 1)
        };
        self.last_generated = id;
        id
    }

    fn delivery(&self, id: EntryId) -> Delivery {
        // Trimmed entries still pending in a group come back with no fields,
        // which decodes as malformed.
        let fields = self.entries.get(&id).cloned().unwrap_or_default();
        codec::decode(id, fields)
    }
}

/// Snapshot of one pending entry, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    pub deliveries: u32,
}

/// In-process event log with the same group semantics as the Redis stream
/// adapter. Used by tests and single-node development.
///
/// Connection faults can be injected: [`drop_connection`] makes every call
/// fail until [`EventLog::reconnect`] succeeds, and [`set_reachable`] controls
/// whether reconnecting is possible at all.
///
/// [`drop_connection`]: MemoryEventLog::drop_connection
/// [`set_reachable`]: MemoryEventLog::set_reachable
#[derive(Debug)]
pub struct MemoryEventLog {
    state: Mutex<LogState>,
    appended: Notify,
    capacity: usize,
    connected: AtomicBool,
    reachable: AtomicBool,
    reconnects: AtomicU64,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl MemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            appended: Notify::new(),
            capacity: capacity.max(1),
            connected: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Append arbitrary fields, bypassing event encoding.
    pub fn append_raw<K, V>(
        &self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> EntryId
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.entries.insert(id, fields);
            while state.entries.len() > self.capacity {
                state.entries.pop_first();
            }
            id
        };
        self.appended.notify_waiters();
        id
    }

    /// Simulate the current connection dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate the log host going away (or coming back). While unreachable,
    /// every call and every reconnect fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<Delivery> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|(id, fields)| codec::decode(*id, fields.clone()))
            .collect()
    }

    pub fn pending(&self, group: &str) -> Vec<PendingEntry> {
        let state = self.state.lock();
        state
            .groups
            .get(group)
            .map(|group| {
                group
                    .pending
                    .iter()
                    .map(|(id, pending)| PendingEntry {
                        id: *id,
                        consumer: pending.consumer.clone(),
                        deliveries: pending.deliveries,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_connection(&self) -> Result<(), LogError> {
        if self.connected.load(Ordering::SeqCst)
            && self.reachable.load(Ordering::SeqCst)
        {
            Ok(())
        } else {
            Err(LogError::Unavailable("connection closed".to_string()))
        }
    }

    fn claim_now(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<Delivery>, LogError> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let LogState {
            entries, groups, ..
        } = &mut *state;
        let group = groups.get_mut(&request.group).ok_or_else(|| {
            LogError::Protocol(format!(
                "NOGROUP no such consumer group '{}'",
                request.group
            ))
        })?;

        let ids: Vec<EntryId> = match request.from {
            ClaimFrom::Backlog => group
                .pending
                .iter_mut()
                .filter(|(_, pending)| pending.consumer == request.consumer)
                .take(request.count)
                .map(|(id, pending)| {
                    pending.delivered_at = now;
                    pending.deliveries += 1;
                    *id
                })
                .collect(),
            ClaimFrom::New => {
                let start = group.last_delivered;
                let ids: Vec<EntryId> = entries
                    .range(start..)
                    .map(|(id, _)| *id)
                    .filter(|id| *id > start)
                    .take(request.count)
                    .collect();

                for id in &ids {
                    group.pending.insert(
                        *id,
                        Pending {
                            consumer: request.consumer.clone(),
                            delivered_at: now,
                            deliveries: 1,
                        },
                    );
                }
                if let Some(last) = ids.last() {
                    group.last_delivered = *last;
                }
                ids
            }
        };

        Ok(ids.into_iter().map(|id| state.delivery(id)).collect())
    }

    fn read_after_now(&self, after: EntryId, count: usize) -> Vec<Delivery> {
        let state = self.state.lock();
        state
            .entries
            .range(after..)
            .filter(|(id, _)| **id > after)
            .take(count)
            .map(|(id, fields)| codec::decode(*id, fields.clone()))
            .collect()
    }

    /// Poll `read` until it yields something or `block` elapses.
    async fn wait_for<F>(
        &self,
        block: Duration,
        mut read: F,
    ) -> Result<Vec<Delivery>, LogError>
    where
        F: FnMut() -> Result<Vec<Delivery>, LogError>,
    {
        let deadline = Instant::now() + block;
        loop {
            let appended = self.appended.notified();
            self.check_connection()?;
            let deliveries = read()?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        event: &AttendanceEvent,
    ) -> Result<EntryId, LogError> {
        self.check_connection()?;
        Ok(self.append_raw(codec::encode(event)))
    }

    async fn ensure_group(&self, group: &str) -> Result<(), LogError> {
        self.check_connection()?;
        self.state.lock().groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn claim(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<Delivery>, LogError> {
        self.check_connection()?;
        match request.from {
            ClaimFrom::Backlog => self.claim_now(request),
            ClaimFrom::New => {
                self.wait_for(request.block, || self.claim_now(request)).await
            }
        }
    }

    async fn reclaim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, LogError> {
        self.check_connection()?;
        let mut state = self.state.lock();
        let now = Instant::now();

        let LogState {
            entries, groups, ..
        } = &mut *state;
        let group_state = groups.get_mut(group).ok_or_else(|| {
            LogError::Protocol(format!(
                "NOGROUP no such consumer group '{group}'"
            ))
        })?;

        let idle: Vec<EntryId> = group_state
            .pending
            .iter()
            .filter(|(_, pending)| {
                now.saturating_duration_since(pending.delivered_at) >= min_idle
            })
            .map(|(id, _)| *id)
            .take(count)
            .collect();

        let mut claimed = Vec::with_capacity(idle.len());
        for id in idle {
            if !entries.contains_key(&id) {
                group_state.pending.remove(&id);
                continue;
            }
            if let Some(pending) = group_state.pending.get_mut(&id) {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                pending.deliveries += 1;
                claimed.push(id);
            }
        }

        Ok(claimed.into_iter().map(|id| state.delivery(id)).collect())
    }

    async fn acknowledge(
        &self,
        group: &str,
        ids: &[EntryId],
    ) -> Result<u64, LogError> {
        self.check_connection()?;
        let mut state = self.state.lock();
        let Some(group) = state.groups.get_mut(group) else {
            return Ok(0);
        };
        let acked = ids
            .iter()
            .filter(|id| group.pending.remove(id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn last_id(&self) -> Result<Option<EntryId>, LogError> {
        self.check_connection()?;
        Ok(self.state.lock().entries.keys().next_back().copied())
    }

    async fn read_after(
        &self,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, LogError> {
        self.wait_for(block, || Ok(self.read_after_now(after, count)))
            .await
    }

    async fn ping(&self) -> Result<(), LogError> {
        self.check_connection()
    }

    async fn reconnect(&self) -> Result<(), LogError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
