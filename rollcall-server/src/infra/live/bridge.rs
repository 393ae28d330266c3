use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rollcall_core::{
    domain::{Delivery, EntryId},
    log::EventLog,
    retry::{Backoff, RetryPolicy},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::infra::websocket::ConnectionManager;

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Longest wait for new entries in one read.
    pub block: Duration,
    pub count: usize,
    pub retry: RetryPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            block: Duration::from_secs(5),
            count: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Tails the log outside any consumer group and forwards every new entry to
/// the connected observers. Nothing is acknowledged; entries appended while
/// the bridge is down are never replayed.
pub struct FanoutBridge {
    log: Arc<dyn EventLog>,
    observers: ConnectionManager,
    settings: BridgeSettings,
    started: AtomicBool,
    running: AtomicBool,
    shutdown: CancellationToken,
}

impl fmt::Debug for FanoutBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutBridge")
            .field("settings", &self.settings)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FanoutBridge {
    pub fn new(
        log: Arc<dyn EventLog>,
        observers: ConnectionManager,
        settings: BridgeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            log,
            observers,
            settings,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Spawn the reader task unless it already exists. Returns `true` only
    /// for the call that started it. A reader that panics is restarted from
    /// the tail; once the reader stops for good the next call starts a new
    /// one.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let bridge = Arc::clone(self);
        tokio::spawn(async move { bridge.supervise().await });
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the reader has fixed its start position and is tailing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn supervise(self: Arc<Self>) {
        let mut backoff = self.settings.retry.backoff();
        loop {
            let reader = tokio::spawn(Arc::clone(&self).run());
            match reader.await {
                Ok(()) => break,
                Err(err) if err.is_panic() && !self.shutdown.is_cancelled() => {
                    self.running.store(false, Ordering::Release);
                    error!(
                        attempt = backoff.attempt() + 1,
                        "Live fan-out reader panicked; restarting from the tail"
                    );
                    if !backoff.wait(&self.shutdown).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Live fan-out reader aborted");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        self.started.store(false, Ordering::Release);
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = self.settings.retry.backoff();

        let Some(mut cursor) = self.start_position(&mut backoff).await else {
            return;
        };
        backoff.reset();
        self.running.store(true, Ordering::Release);
        info!(cursor = %cursor, "Live fan-out bridge started");

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = self.log.read_after(
                    cursor,
                    self.settings.count,
                    self.settings.block,
                ) => read,
            };

            match read {
                Ok(deliveries) => {
                    backoff.reset();
                    for delivery in deliveries {
                        cursor = delivery.id();
                        match delivery {
                            Delivery::Event(entry) => {
                                let delivered = self
                                    .observers
                                    .broadcast(&entry.event.notification());
                                debug!(
                                    entry_id = %entry.id,
                                    delivered,
                                    "Fanned out entry"
                                );
                            }
                            Delivery::Malformed(entry) => {
                                debug!(
                                    entry_id = %entry.id,
                                    reason = %entry.reason,
                                    "Skipping malformed entry"
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Live read failed; reconnecting");
                    if let Err(err) = self.log.reconnect().await {
                        debug!(error = %err, "Reconnect failed");
                    }
                    if !backoff.wait(&self.shutdown).await {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!("Live fan-out bridge stopped");
    }

    /// Tail of the log, or the zero id when the log is empty. Retries until
    /// it succeeds or shutdown is requested.
    async fn start_position(&self, backoff: &mut Backoff) -> Option<EntryId> {
        loop {
            match self.log.last_id().await {
                Ok(last) => return Some(last.unwrap_or(EntryId::ZERO)),
                Err(err) => {
                    warn!(error = %err, "Could not read log tail; retrying");
                    if let Err(err) = self.log.reconnect().await {
                        debug!(error = %err, "Reconnect failed");
                    }
                    if !backoff.wait(&self.shutdown).await {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::websocket::Connection;
    use async_trait::async_trait;
    use chrono::Utc;
    use rollcall_core::{
        domain::{AttendanceEvent, ClassId, LiveNotification, RollNumber},
        error::LogError,
        log::{ClaimRequest, MemoryEventLog},
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn event(roll: &str) -> AttendanceEvent {
        AttendanceEvent::new(
            RollNumber::parse(roll).unwrap(),
            ClassId::parse("7").unwrap(),
            Utc::now(),
        )
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            block: Duration::from_millis(50),
            count: 10,
            retry: RetryPolicy {
                backoff_base_ms: 5,
                backoff_max_ms: 20,
                jitter_ratio: 0.0,
                jitter_min_ms: 0,
            },
        }
    }

    async fn wait_until_running(bridge: &FanoutBridge) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !bridge.is_running() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("bridge did not start");
    }

    async fn next(
        rx: &mut mpsc::Receiver<LiveNotification>,
    ) -> LiveNotification {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no notification")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn ensure_started_spawns_one_reader() {
        let bridge = Arc::new(FanoutBridge::new(
            Arc::new(MemoryEventLog::default()),
            ConnectionManager::new(),
            settings(),
            CancellationToken::new(),
        ));

        assert!(bridge.ensure_started());
        assert!(!bridge.ensure_started());
        assert!(bridge.is_started());
        bridge.shutdown.cancel();
    }

    #[tokio::test]
    async fn skips_backlog_and_forwards_later_appends_in_order() {
        let log = Arc::new(MemoryEventLog::default());
        log.append(&event("old")).await.unwrap();

        let observers = ConnectionManager::new();
        let (tx, mut rx) = mpsc::channel(16);
        observers.add_connection(Arc::new(Connection::new(tx)));

        let shutdown = CancellationToken::new();
        let bridge = Arc::new(FanoutBridge::new(
            log.clone(),
            observers,
            settings(),
            shutdown.clone(),
        ));
        bridge.ensure_started();
        wait_until_running(&bridge).await;

        log.append(&event("1")).await.unwrap();
        log.append(&event("2")).await.unwrap();

        assert_eq!(next(&mut rx).await.roll_no, "1");
        assert_eq!(next(&mut rx).await.roll_no, "2");

        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_log_forwards_everything_appended_after_start() {
        let log = Arc::new(MemoryEventLog::default());
        let observers = ConnectionManager::new();
        let (tx, mut rx) = mpsc::channel(16);
        observers.add_connection(Arc::new(Connection::new(tx)));

        let shutdown = CancellationToken::new();
        let bridge = Arc::new(FanoutBridge::new(
            log.clone(),
            observers,
            settings(),
            shutdown.clone(),
        ));
        bridge.ensure_started();
        wait_until_running(&bridge).await;

        log.append(&event("42")).await.unwrap();
        let notification = next(&mut rx).await;
        assert_eq!(notification.roll_no, "42");
        assert_eq!(notification.class_id, "7");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn recovers_after_the_connection_drops() {
        let log = Arc::new(MemoryEventLog::default());
        let observers = ConnectionManager::new();
        let (tx, mut rx) = mpsc::channel(16);
        observers.add_connection(Arc::new(Connection::new(tx)));

        let shutdown = CancellationToken::new();
        let bridge = Arc::new(FanoutBridge::new(
            log.clone(),
            observers,
            settings(),
            shutdown.clone(),
        ));
        bridge.ensure_started();
        wait_until_running(&bridge).await;

        log.drop_connection();
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.reconnect_count() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("bridge never reconnected");

        log.append(&event("after")).await.unwrap();
        assert_eq!(next(&mut rx).await.roll_no, "after");
        shutdown.cancel();
    }

    /// Panics on the first live read; counts tail lookups.
    struct PanicOnceLog {
        inner: MemoryEventLog,
        panics_left: AtomicUsize,
        tail_reads: AtomicUsize,
    }

    #[async_trait]
    impl EventLog for PanicOnceLog {
        async fn append(
            &self,
            event: &AttendanceEvent,
        ) -> Result<EntryId, LogError> {
            self.inner.append(event).await
        }

        async fn ensure_group(&self, group: &str) -> Result<(), LogError> {
            self.inner.ensure_group(group).await
        }

        async fn claim(
            &self,
            request: &ClaimRequest,
        ) -> Result<Vec<Delivery>, LogError> {
            self.inner.claim(request).await
        }

        async fn reclaim_idle(
            &self,
            group: &str,
            consumer: &str,
            min_idle: Duration,
            count: usize,
        ) -> Result<Vec<Delivery>, LogError> {
            self.inner
                .reclaim_idle(group, consumer, min_idle, count)
                .await
        }

        async fn acknowledge(
            &self,
            group: &str,
            ids: &[EntryId],
        ) -> Result<u64, LogError> {
            self.inner.acknowledge(group, ids).await
        }

        async fn last_id(&self) -> Result<Option<EntryId>, LogError> {
            let last = self.inner.last_id().await;
            self.tail_reads.fetch_add(1, Ordering::SeqCst);
            last
        }

        async fn read_after(
            &self,
            after: EntryId,
            count: usize,
            block: Duration,
        ) -> Result<Vec<Delivery>, LogError> {
            let should_panic = self
                .panics_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok();
            if should_panic {
                panic!("live read exploded");
            }
            self.inner.read_after(after, count, block).await
        }

        async fn ping(&self) -> Result<(), LogError> {
            self.inner.ping().await
        }

        async fn reconnect(&self) -> Result<(), LogError> {
            self.inner.reconnect().await
        }
    }

    #[tokio::test]
    async fn panicked_reader_restarts_from_the_tail() {
        let log = Arc::new(PanicOnceLog {
            inner: MemoryEventLog::default(),
            panics_left: AtomicUsize::new(1),
            tail_reads: AtomicUsize::new(0),
        });
        let observers = ConnectionManager::new();
        let (tx, mut rx) = mpsc::channel(16);
        observers.add_connection(Arc::new(Connection::new(tx)));

        let shutdown = CancellationToken::new();
        let bridge = Arc::new(FanoutBridge::new(
            log.clone(),
            observers,
            settings(),
            shutdown.clone(),
        ));
        bridge.ensure_started();

        tokio::time::timeout(Duration::from_secs(5), async {
            while log.tail_reads.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("reader was not restarted");

        log.append(&event("42")).await.unwrap();
        assert_eq!(next(&mut rx).await.roll_no, "42");
        assert!(bridge.is_started());
        assert!(!bridge.ensure_started());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_clears_the_started_flag() {
        let shutdown = CancellationToken::new();
        let bridge = Arc::new(FanoutBridge::new(
            Arc::new(MemoryEventLog::default()),
            ConnectionManager::new(),
            settings(),
            shutdown.clone(),
        ));
        bridge.ensure_started();
        wait_until_running(&bridge).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.is_started() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("bridge did not stop");
        assert!(!bridge.is_running());
    }
}
