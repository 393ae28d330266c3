use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::{
    AsyncCommands,
    aio::{ConnectionManager, ConnectionManagerConfig},
    streams::{
        StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamMaxlen,
        StreamRangeReply, StreamReadOptions, StreamReadReply,
    },
};
use tracing::{debug, info};

use super::{ClaimFrom, ClaimRequest, EventLog, codec};
use crate::{
    domain::{AttendanceEvent, Delivery, EntryId, InvalidEntryId},
    error::LogError,
};

/// Stream-level settings shared by every handle onto the same log.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub stream: String,
    /// Approximate number of entries retained before the oldest are trimmed.
    pub capacity: usize,
    /// Longest block any caller of this handle will request. The connection's
    /// response timeout is derived from it so blocking reads are not cut short.
    pub max_block: Duration,
    /// Bound on one connection attempt. Attempts are never retried inside
    /// the adapter; callers own the retry schedule.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream: "attendance_stream".to_string(),
            capacity: 1_000_000,
            max_block: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Event log backed by a Redis/Valkey stream.
///
/// Each handle owns its own connection. Blocking group reads hold the
/// connection for up to `max_block`, so components never share a handle.
pub struct RedisEventLog {
    client: redis::Client,
    conn: RwLock<ConnectionManager>,
    settings: StreamSettings,
}

impl fmt::Debug for RedisEventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventLog")
            .field("connection", &"ConnectionManager")
            .field("settings", &self.settings)
            .finish()
    }
}

impl RedisEventLog {
    /// Connect eagerly; fails if the log cannot be reached right now.
    pub async fn connect(
        redis_url: &str,
        settings: StreamSettings,
    ) -> Result<Self, LogError> {
        info!(stream = %settings.stream, "Connecting to event log");

        let client = Self::client(redis_url)?;
        let conn = Self::open(&client, &settings).await?;

        info!(stream = %settings.stream, "Connected to event log");

        Ok(Self {
            client,
            conn: RwLock::new(conn),
            settings,
        })
    }

    /// Build the handle without touching the network. The first command
    /// opens the connection, so an outage at startup surfaces as a
    /// transient error on first use.
    pub fn connect_lazy(
        redis_url: &str,
        settings: StreamSettings,
    ) -> Result<Self, LogError> {
        let client = Self::client(redis_url)?;
        let conn = ConnectionManager::new_lazy_with_config(
            client.clone(),
            Self::manager_config(&settings),
        )?;

        debug!(stream = %settings.stream, "Event log handle created");

        Ok(Self {
            client,
            conn: RwLock::new(conn),
            settings,
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    fn client(redis_url: &str) -> Result<redis::Client, LogError> {
        redis::Client::open(redis_url).map_err(|e| {
            LogError::Protocol(format!("Failed to create Redis client: {e}"))
        })
    }

    fn manager_config(settings: &StreamSettings) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(Some(settings.connect_timeout))
            .set_response_timeout(Some(
                settings.max_block + Duration::from_secs(5),
            ))
    }

    async fn open(
        client: &redis::Client,
        settings: &StreamSettings,
    ) -> Result<ConnectionManager, LogError> {
        ConnectionManager::new_with_config(
            client.clone(),
            Self::manager_config(settings),
        )
        .await
        .map_err(LogError::from)
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.read().clone()
    }

    fn deliveries(
        reply: Option<StreamReadReply>,
    ) -> Result<Vec<Delivery>, LogError> {
        reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(|stream_id| Self::decode(&stream_id))
            .collect()
    }

    fn decode(stream_id: &StreamId) -> Result<Delivery, LogError> {
        let id = parse_id(&stream_id.id)?;

        let fields: BTreeMap<String, String> = stream_id
            .map
            .keys()
            .filter_map(|key| {
                stream_id
                    .get::<String>(key)
                    .map(|value| (key.clone(), value))
            })
            .collect();

        Ok(codec::decode(id, fields))
    }
}

fn parse_id(raw: &str) -> Result<EntryId, LogError> {
    raw.parse()
        .map_err(|e: InvalidEntryId| LogError::Protocol(e.to_string()))
}

fn block_millis(block: Duration) -> usize {
    block.as_millis().max(1) as usize
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn append(
        &self,
        event: &AttendanceEvent,
    ) -> Result<EntryId, LogError> {
        let fields = codec::encode(event);
        let mut conn = self.connection();

        let id: String = conn
            .xadd_maxlen(
                &self.settings.stream,
                StreamMaxlen::Approx(self.settings.capacity),
                "*",
                &fields,
            )
            .await?;

        debug!(entry_id = %id, roll_no = %event.roll_number, "XADD");
        parse_id(&id)
    }

    async fn ensure_group(&self, group: &str) -> Result<(), LogError> {
        let mut conn = self.connection();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.settings.stream, group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(
                    group,
                    stream = %self.settings.stream,
                    "Consumer group created"
                );
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => {
                debug!(group, "Consumer group already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn claim(
        &self,
        request: &ClaimRequest,
    ) -> Result<Vec<Delivery>, LogError> {
        let mut options = StreamReadOptions::default()
            .group(&request.group, &request.consumer)
            .count(request.count);

        let start = match request.from {
            ClaimFrom::Backlog => "0",
            ClaimFrom::New => {
                options = options.block(block_millis(request.block));
                ">"
            }
        };

        let mut conn = self.connection();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream], &[start], &options)
            .await?;

        Self::deliveries(reply)
    }

    async fn reclaim_idle(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, LogError> {
        let mut conn = self.connection();
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.settings.stream,
                group,
                consumer,
                min_idle.as_millis() as u64,
                "0-0",
                StreamAutoClaimOptions::default().count(count),
            )
            .await?;

        if !reply.deleted_ids.is_empty() {
            debug!(
                deleted = reply.deleted_ids.len(),
                "Pending entries trimmed before reclaim"
            );
        }

        reply.claimed.iter().map(Self::decode).collect()
    }

    async fn acknowledge(
        &self,
        group: &str,
        ids: &[EntryId],
    ) -> Result<u64, LogError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut conn = self.connection();
        let acked: u64 = conn.xack(&self.settings.stream, group, &ids).await?;
        Ok(acked)
    }

    async fn last_id(&self) -> Result<Option<EntryId>, LogError> {
        let mut conn = self.connection();
        let reply: StreamRangeReply = conn
            .xrevrange_count(&self.settings.stream, "+", "-", 1)
            .await?;

        reply.ids.first().map(|newest| parse_id(&newest.id)).transpose()
    }

    async fn read_after(
        &self,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, LogError> {
        let options = StreamReadOptions::default()
            .count(count)
            .block(block_millis(block));
        let cursor = after.to_string();

        let mut conn = self.connection();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream], &[&cursor], &options)
            .await?;

        Self::deliveries(reply)
    }

    async fn ping(&self) -> Result<(), LogError> {
        let mut conn = self.connection();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(LogError::from)
    }

    async fn reconnect(&self) -> Result<(), LogError> {
        let fresh = Self::open(&self.client, &self.settings).await?;
        *self.conn.write() = fresh;
        info!(
            stream = %self.settings.stream,
            "Event log connection re-established"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use redis::Value;

    use super::*;

    fn stream_id(id: &str, fields: &[(&str, &str)]) -> StreamId {
        let mut stream_id = StreamId::default();
        stream_id.id = id.to_string();
        for (key, value) in fields {
            stream_id.map.insert(
                key.to_string(),
                Value::BulkString(value.as_bytes().to_vec()),
            );
        }
        stream_id
    }

    fn unreachable_settings() -> StreamSettings {
        StreamSettings {
            connect_timeout: Duration::from_millis(500),
            ..StreamSettings::default()
        }
    }

    // Nothing listens on port 1.
    const UNREACHABLE_URL: &str = "redis://127.0.0.1:1";

    #[test]
    fn stream_entry_decodes_into_an_event() {
        let delivery = RedisEventLog::decode(&stream_id(
            "1700000000000-3",
            &[
                ("roll_no", "42"),
                ("class_id", "7"),
                ("timestamp", "2025-03-14T09:26:53Z"),
            ],
        ))
        .unwrap();

        assert_eq!(
            delivery.id(),
            "1700000000000-3".parse::<EntryId>().unwrap()
        );
        let event = delivery.event().unwrap();
        assert_eq!(event.roll_number.as_str(), "42");
        assert_eq!(event.class_id.as_str(), "7");
    }

    #[test]
    fn incomplete_stream_entry_is_malformed_not_an_error() {
        let delivery = RedisEventLog::decode(&stream_id(
            "1700000000000-0",
            &[("roll_no", "42")],
        ))
        .unwrap();

        match delivery {
            Delivery::Malformed(entry) => {
                assert_eq!(entry.fields.get("roll_no").unwrap(), "42");
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[test]
    fn unparseable_entry_id_is_a_protocol_error() {
        let err = RedisEventLog::decode(&stream_id("not-an-id", &[]))
            .unwrap_err();
        assert!(matches!(err, LogError::Protocol(_)));
    }

    #[test]
    fn empty_read_reply_yields_no_deliveries() {
        assert!(RedisEventLog::deliveries(None).unwrap().is_empty());
    }

    #[test]
    fn block_is_at_least_one_millisecond() {
        // BLOCK 0 would wait forever.
        assert_eq!(block_millis(Duration::ZERO), 1);
        assert_eq!(block_millis(Duration::from_micros(300)), 1);
        assert_eq!(block_millis(Duration::from_secs(5)), 5000);
    }

    #[tokio::test]
    async fn failed_connect_returns_promptly() {
        let started = Instant::now();
        let err =
            RedisEventLog::connect(UNREACHABLE_URL, unreachable_settings())
                .await
                .unwrap_err();

        assert!(err.is_transient(), "unexpected error {err}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn lazy_handle_fails_transiently_and_reconnects_promptly() {
        let log =
            RedisEventLog::connect_lazy(UNREACHABLE_URL, unreachable_settings())
                .unwrap();

        let err = log.ping().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error {err}");

        let started = Instant::now();
        assert!(log.reconnect().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn malformed_url_is_rejected_up_front() {
        let err =
            RedisEventLog::connect_lazy("not a url", StreamSettings::default())
                .unwrap_err();
        assert!(!err.is_transient());
    }
}
