//! Redis stream behaviour of the event log. These need a running
//! Redis/Valkey server:
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p rollcall-core \
//!     --test redis_log -- --ignored
//! ```

use std::time::Duration;

use chrono::Utc;
use rollcall_core::{
    domain::{AttendanceEvent, ClassId, Delivery, EntryId, RollNumber},
    log::{ClaimFrom, ClaimRequest, EventLog, RedisEventLog, StreamSettings},
};
use uuid::Uuid;

const GROUP: &str = "attendance_group";

fn redis_url() -> String {
    std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// A log on a fresh, uniquely named stream. `cleanup` deletes it.
struct TestStream {
    log: RedisEventLog,
    client: redis::Client,
    name: String,
}

impl TestStream {
    async fn new() -> Self {
        let name = format!("rollcall_test_{}", Uuid::new_v4());
        let settings = StreamSettings {
            stream: name.clone(),
            capacity: 1000,
            max_block: Duration::from_secs(1),
            ..StreamSettings::default()
        };
        let log = RedisEventLog::connect(&redis_url(), settings)
            .await
            .expect("Failed to connect to test Redis");
        let client = redis::Client::open(redis_url()).unwrap();
        Self { log, client, name }
    }

    async fn raw(&self) -> redis::aio::MultiplexedConnection {
        self.client.get_multiplexed_async_connection().await.unwrap()
    }

    async fn append_raw(&self, fields: &[(&str, &str)]) -> EntryId {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.name).arg("*");
        for (key, value) in fields {
            cmd.arg(*key).arg(*value);
        }
        let id: String = cmd.query_async(&mut self.raw().await).await.unwrap();
        id.parse().unwrap()
    }

    async fn delete_entry(&self, id: EntryId) {
        let _: u64 = redis::cmd("XDEL")
            .arg(&self.name)
            .arg(id.to_string())
            .query_async(&mut self.raw().await)
            .await
            .unwrap();
    }

    async fn cleanup(self) {
        let _: u64 = redis::cmd("DEL")
            .arg(&self.name)
            .query_async(&mut self.raw().await)
            .await
            .unwrap();
    }
}

fn event(roll: &str) -> AttendanceEvent {
    AttendanceEvent::new(
        RollNumber::parse(roll).unwrap(),
        ClassId::parse("7").unwrap(),
        Utc::now(),
    )
}

fn request(consumer: &str, from: ClaimFrom) -> ClaimRequest {
    ClaimRequest {
        group: GROUP.to_string(),
        consumer: consumer.to_string(),
        count: 10,
        from,
        block: Duration::from_millis(100),
    }
}

fn rolls(deliveries: &[Delivery]) -> Vec<String> {
    deliveries
        .iter()
        .filter_map(Delivery::event)
        .map(|e| e.roll_number.to_string())
        .collect()
}

#[tokio::test]
#[ignore]
async fn creating_an_existing_group_is_not_an_error() {
    let stream = TestStream::new().await;

    stream.log.ensure_group(GROUP).await.unwrap();
    stream.log.ensure_group(GROUP).await.unwrap();

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn backlog_redelivers_until_acknowledged() {
    let stream = TestStream::new().await;
    stream.log.ensure_group(GROUP).await.unwrap();
    stream.log.append(&event("42")).await.unwrap();
    stream.log.append(&event("43")).await.unwrap();

    let claimed = stream
        .log
        .claim(&request("c1", ClaimFrom::New))
        .await
        .unwrap();
    assert_eq!(rolls(&claimed), ["42", "43"]);

    // Nothing new is left, and another consumer has no backlog.
    let empty = stream
        .log
        .claim(&request("c1", ClaimFrom::New))
        .await
        .unwrap();
    assert!(empty.is_empty());
    let other = stream
        .log
        .claim(&request("c2", ClaimFrom::Backlog))
        .await
        .unwrap();
    assert!(other.is_empty());

    let backlog = stream
        .log
        .claim(&request("c1", ClaimFrom::Backlog))
        .await
        .unwrap();
    assert_eq!(rolls(&backlog), ["42", "43"]);

    let ids: Vec<EntryId> = backlog.iter().map(Delivery::id).collect();
    assert_eq!(stream.log.acknowledge(GROUP, &ids).await.unwrap(), 2);
    let drained = stream
        .log
        .claim(&request("c1", ClaimFrom::Backlog))
        .await
        .unwrap();
    assert!(drained.is_empty());

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn idle_entries_move_to_the_reclaiming_consumer() {
    let stream = TestStream::new().await;
    stream.log.ensure_group(GROUP).await.unwrap();
    stream.log.append(&event("42")).await.unwrap();
    stream.log.claim(&request("c1", ClaimFrom::New)).await.unwrap();

    let reclaimed = stream
        .log
        .reclaim_idle(GROUP, "c2", Duration::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(rolls(&reclaimed), ["42"]);

    let backlog = stream
        .log
        .claim(&request("c2", ClaimFrom::Backlog))
        .await
        .unwrap();
    assert_eq!(rolls(&backlog), ["42"]);

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn entries_deleted_while_pending_are_not_reclaimed() {
    let stream = TestStream::new().await;
    stream.log.ensure_group(GROUP).await.unwrap();
    let id = stream.log.append(&event("42")).await.unwrap();
    stream.log.claim(&request("c1", ClaimFrom::New)).await.unwrap();
    stream.delete_entry(id).await;

    let reclaimed = stream
        .log
        .reclaim_idle(GROUP, "c2", Duration::ZERO, 10)
        .await
        .unwrap();
    assert!(reclaimed.is_empty());

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn incomplete_entries_are_delivered_as_malformed() {
    let stream = TestStream::new().await;
    stream.log.ensure_group(GROUP).await.unwrap();
    let id = stream.append_raw(&[("roll_no", "42")]).await;

    let claimed = stream
        .log
        .claim(&request("c1", ClaimFrom::New))
        .await
        .unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id(), id);
    assert!(matches!(claimed[0], Delivery::Malformed(_)));

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn tail_reads_follow_the_newest_entry() {
    let stream = TestStream::new().await;
    assert_eq!(stream.log.last_id().await.unwrap(), None);

    let first = stream.log.append(&event("42")).await.unwrap();
    assert_eq!(stream.log.last_id().await.unwrap(), Some(first));
    let second = stream.log.append(&event("43")).await.unwrap();
    assert_eq!(stream.log.last_id().await.unwrap(), Some(second));

    let after_first = stream
        .log
        .read_after(first, 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(rolls(&after_first), ["43"]);

    let after_last = stream
        .log
        .read_after(second, 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(after_last.is_empty());

    stream.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn reconnect_replaces_the_connection() {
    let stream = TestStream::new().await;

    stream.log.reconnect().await.unwrap();
    stream.log.ping().await.unwrap();
    stream.log.append(&event("42")).await.unwrap();

    stream.cleanup().await;
}
