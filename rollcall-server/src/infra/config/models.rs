use std::{path::PathBuf, str::FromStr, time::Duration};

use chrono::FixedOffset;
use rollcall_core::{
    committer::{CommitterConfig, host_offset},
    log::StreamSettings,
    retry::RetryPolicy,
    store::PoolSettings,
};

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub log: EventLogConfig,
    pub committer: CommitterSettings,
    pub fanout: FanoutSettings,
    pub retry: RetryPolicy,
    pub cors: CorsConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Settings for one log handle. The response timeout of the handle must
    /// cover the longest block any component issues on it.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            stream: self.log.stream.clone(),
            capacity: self.log.capacity,
            max_block: self.committer.claim_block.max(self.fanout.block),
            connect_timeout: self.log.connect_timeout,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.database.max_connections,
            acquire_timeout: self.database.acquire_timeout,
        }
    }

    /// Committer settings for the `instance`-th worker (1-based); consumer
    /// names are `<consumer>-<instance>`.
    pub fn committer_config(&self, instance: usize) -> CommitterConfig {
        CommitterConfig {
            group: self.log.group.clone(),
            consumer: format!("{}-{instance}", self.committer.consumer),
            batch_size: self.committer.batch_size,
            claim_block: self.committer.claim_block,
            reclaim_idle: self.committer.reclaim_idle,
            record_offset: self.committer.record_offset.resolve(),
            unknown_name: self.committer.unknown_name.clone(),
            retry: self.retry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Only the committer workers and `db migrate` need it.
    pub primary_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EventLogConfig {
    pub url: String,
    pub stream: String,
    pub group: String,
    pub capacity: usize,
    /// Bound on a single connection attempt to the log.
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CommitterSettings {
    pub consumer: String,
    pub instances: usize,
    pub batch_size: usize,
    pub claim_block: Duration,
    pub reclaim_idle: Duration,
    pub record_offset: RecordOffset,
    pub unknown_name: String,
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub block: Duration,
    pub count: usize,
    /// Outbound frames buffered per observer before it is dropped.
    pub observer_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

/// Offset used to split capture instants into record date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOffset {
    /// The host's offset at the moment a worker starts.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl RecordOffset {
    pub fn resolve(&self) -> FixedOffset {
        match self {
            RecordOffset::Local => host_offset(),
            RecordOffset::Fixed(offset) => *offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid UTC offset '{0}' (expected `local`, `Z` or `+HH:MM`)")]
pub struct InvalidRecordOffset(pub String);

impl FromStr for RecordOffset {
    type Err = InvalidRecordOffset;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || InvalidRecordOffset(raw.to_string());

        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(RecordOffset::Local);
        }
        if trimmed.eq_ignore_ascii_case("z")
            || trimmed.eq_ignore_ascii_case("utc")
        {
            return FixedOffset::east_opt(0)
                .map(RecordOffset::Fixed)
                .ok_or_else(invalid);
        }

        let (sign, rest) = match trimmed.split_at_checked(1) {
            Some(("+", rest)) => (1, rest),
            Some(("-", rest)) => (-1, rest),
            _ => return Err(invalid()),
        };
        let (hours, minutes) = match rest.split_once(':') {
            Some((hours, minutes)) => (hours, minutes),
            None if rest.len() == 4 => rest.split_at(2),
            None => (rest, "0"),
        };
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(RecordOffset::Fixed)
            .ok_or_else(invalid)
    }
}
