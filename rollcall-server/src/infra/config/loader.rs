use once_cell::sync::Lazy;
use rollcall_core::{domain::UNKNOWN_DISPLAY_NAME, retry::RetryPolicy};
use std::{fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

use super::{
    models::{
        CommitterSettings, Config, ConfigMetadata, CorsConfig, DatabaseConfig,
        EventLogConfig, FanoutSettings, InvalidRecordOffset, RecordOffset,
        ServerConfig,
    },
    sources::{EnvConfig, FileConfig, FileDatabaseConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("rollcall.toml"),
        PathBuf::from("config/rollcall.toml"),
    ]
});

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then the process environment, then compose.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Compose from an already gathered environment snapshot.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) = self.compose_config(
            file_config,
            env,
            config_path,
            env_file_loaded,
        )?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if file_config.is_none() {
            warnings.push_with_hint(
                "No rollcall.toml detected; using environment variables and \
                 defaults",
                "Create rollcall.toml or set ROLLCALL_CONFIG_PATH",
            );
        }

        let FileConfig {
            server: file_server,
            database: file_database,
            log: file_log,
            committer: file_committer,
            fanout: file_fanout,
            retry: file_retry,
            cors: file_cors,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(8000),
        };

        let database = DatabaseConfig {
            primary_url: self.resolve_database_url(&env, &file_database)?,
            max_connections: env
                .database_max_connections
                .or(file_database.max_connections)
                .unwrap_or(5),
            acquire_timeout: Duration::from_secs(
                file_database.acquire_timeout_secs.unwrap_or(30),
            ),
        };
        if database.primary_url.is_none() {
            warnings.push_with_hint(
                "No database URL configured; committer workers and \
                 `db migrate` will refuse to start",
                "Set DATABASE_URL or DATABASE_HOST/DATABASE_USER/DATABASE_NAME",
            );
        }

        let log_url = match env
            .redis_url
            .clone()
            .or(file_log.url)
            .filter(|value| !value.trim().is_empty())
        {
            Some(url) => url,
            None => {
                warnings.push_with_hint(
                    format!(
                        "No event log URL configured; using {DEFAULT_REDIS_URL}"
                    ),
                    "Set REDIS_URL or log.url",
                );
                DEFAULT_REDIS_URL.to_string()
            }
        };
        let log = EventLogConfig {
            url: log_url,
            stream: env
                .stream
                .clone()
                .or(file_log.stream)
                .unwrap_or_else(|| "attendance_stream".to_string()),
            group: env
                .group
                .clone()
                .or(file_log.group)
                .unwrap_or_else(|| "attendance_group".to_string()),
            capacity: env
                .stream_capacity
                .or(file_log.capacity)
                .unwrap_or(1_000_000),
            connect_timeout: Duration::from_millis(
                env.log_connect_timeout_ms
                    .or(file_log.connect_timeout_ms)
                    .unwrap_or(2_000),
            ),
        };

        let record_offset = match env
            .record_utc_offset
            .clone()
            .or(file_committer.record_utc_offset)
        {
            Some(raw) => raw.parse()?,
            None => RecordOffset::Local,
        };

        let committer = CommitterSettings {
            consumer: env
                .consumer
                .clone()
                .or(file_committer.consumer)
                .unwrap_or_else(|| "committer".to_string()),
            instances: env.instances.or(file_committer.instances).unwrap_or(1),
            batch_size: env
                .batch_size
                .or(file_committer.batch_size)
                .unwrap_or(10),
            claim_block: Duration::from_millis(
                env.claim_block_ms
                    .or(file_committer.claim_block_ms)
                    .unwrap_or(10_000),
            ),
            reclaim_idle: Duration::from_millis(
                env.reclaim_idle_ms
                    .or(file_committer.reclaim_idle_ms)
                    .unwrap_or(60_000),
            ),
            record_offset,
            unknown_name: env
                .unknown_name
                .clone()
                .or(file_committer.unknown_name)
                .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string()),
        };

        let fanout = FanoutSettings {
            block: Duration::from_millis(
                env.fanout_block_ms.or(file_fanout.block_ms).unwrap_or(5_000),
            ),
            count: file_fanout.count.unwrap_or(100),
            observer_buffer: env
                .observer_buffer
                .or(file_fanout.observer_buffer)
                .unwrap_or(64),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            backoff_base_ms: env
                .backoff_base_ms
                .or(file_retry.backoff_base_ms)
                .unwrap_or(defaults.backoff_base_ms),
            backoff_max_ms: env
                .backoff_max_ms
                .or(file_retry.backoff_max_ms)
                .unwrap_or(defaults.backoff_max_ms),
            jitter_ratio: file_retry
                .jitter_ratio
                .unwrap_or(defaults.jitter_ratio),
            ..defaults
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .clone()
                .or(file_cors.allowed_origins)
                .unwrap_or_default(),
        };

        let config = Config {
            server,
            database,
            log,
            committer,
            fanout,
            retry,
            cors,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok((config, warnings))
    }

    fn resolve_database_url(
        &self,
        env: &EnvConfig,
        file_database: &FileDatabaseConfig,
    ) -> Result<Option<String>, ConfigLoadError> {
        if let Some(url) = env
            .database_url
            .clone()
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(Some(url));
        }

        if let Some(stored_url) = file_database.url.as_deref() {
            let trimmed = stored_url.trim();
            if !trimmed.is_empty() {
                let mut parsed = Url::parse(trimmed).map_err(|source| {
                    ConfigLoadError::InvalidDatabaseUrl { source }
                })?;
                if parsed.password().is_none()
                    && let Some(password) = Self::database_password(env)
                {
                    parsed.set_password(Some(&password)).map_err(|_| {
                        ConfigLoadError::InvalidDatabasePassword
                    })?;
                }
                return Ok(Some(parsed.to_string()));
            }
        }

        let non_blank = |value: &Option<String>| {
            value.clone().filter(|v| !v.trim().is_empty())
        };

        if let (Some(host), Some(user), Some(name)) = (
            non_blank(&env.database_host),
            non_blank(&env.database_user),
            non_blank(&env.database_name),
        ) {
            let port = env.database_port.unwrap_or(5432);
            let mut url =
                Url::parse(&format!("postgresql://{host}:{port}/{name}"))
                    .map_err(|source| ConfigLoadError::InvalidDatabaseUrl {
                        source,
                    })?;
            url.set_username(&user).map_err(|_| {
                ConfigLoadError::InvalidDatabaseUsername {
                    username: user.clone(),
                }
            })?;
            if let Some(password) = Self::database_password(env) {
                url.set_password(Some(&password))
                    .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
            }
            return Ok(Some(url.to_string()));
        }

        Ok(None)
    }

    fn database_password(env: &EnvConfig) -> Option<String> {
        env.database_password
            .clone()
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error(transparent)]
    RecordOffset(#[from] InvalidRecordOffset),
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
