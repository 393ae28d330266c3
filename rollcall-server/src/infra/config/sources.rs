use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub log: FileLogConfig,
    #[serde(default)]
    pub committer: FileCommitterConfig,
    #[serde(default)]
    pub fanout: FileFanoutConfig,
    #[serde(default)]
    pub retry: FileRetryConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCommitterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_block_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaim_idle_ms: Option<u64>,
    /// `local` or a fixed offset such as `+05:30`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_utc_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_name: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFanoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_buffer: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ratio: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_name: Option<String>,
    pub database_password: Option<String>,
    pub database_max_connections: Option<u32>,
    pub redis_url: Option<String>,
    pub stream: Option<String>,
    pub group: Option<String>,
    pub stream_capacity: Option<usize>,
    pub log_connect_timeout_ms: Option<u64>,
    pub consumer: Option<String>,
    pub instances: Option<usize>,
    pub batch_size: Option<usize>,
    pub claim_block_ms: Option<u64>,
    pub reclaim_idle_ms: Option<u64>,
    pub record_utc_offset: Option<String>,
    pub unknown_name: Option<String>,
    pub fanout_block_ms: Option<u64>,
    pub observer_buffer: Option<usize>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: std::env::var("ROLLCALL_CONFIG_PATH")
                .ok()
                .map(PathBuf::from),
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port: parse_var("SERVER_PORT"),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_host: std::env::var("DATABASE_HOST").ok(),
            database_port: parse_var("DATABASE_PORT"),
            database_user: std::env::var("DATABASE_USER").ok(),
            database_name: std::env::var("DATABASE_NAME").ok(),
            database_password: std::env::var("DATABASE_PASSWORD").ok(),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS"),
            redis_url: std::env::var("REDIS_URL").ok(),
            stream: std::env::var("ATTENDANCE_STREAM").ok(),
            group: std::env::var("ATTENDANCE_GROUP").ok(),
            stream_capacity: parse_var("STREAM_CAPACITY"),
            log_connect_timeout_ms: parse_var("LOG_CONNECT_TIMEOUT_MS"),
            consumer: std::env::var("CONSUMER_NAME").ok(),
            instances: parse_var("WORKER_INSTANCES"),
            batch_size: parse_var("BATCH_SIZE"),
            claim_block_ms: parse_var("CLAIM_BLOCK_MS"),
            reclaim_idle_ms: parse_var("RECLAIM_IDLE_MS"),
            record_utc_offset: std::env::var("RECORD_UTC_OFFSET").ok(),
            unknown_name: std::env::var("UNKNOWN_NAME").ok(),
            fanout_block_ms: parse_var("FANOUT_BLOCK_MS"),
            observer_buffer: parse_var("OBSERVER_BUFFER"),
            backoff_base_ms: parse_var("BACKOFF_BASE_MS"),
            backoff_max_ms: parse_var("BACKOFF_MAX_MS"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| split_csv(&raw))
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
