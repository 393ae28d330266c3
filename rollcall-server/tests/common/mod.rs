#![allow(dead_code)]

use std::{io::Write, sync::Arc};

use anyhow::{Result, anyhow};
use axum_test::TestServer;
use rollcall_core::log::{EventLog, MemoryEventLog};
use rollcall_server::{
    AppState,
    infra::{
        config::{Config, ConfigLoader, sources::EnvConfig},
        startup::{NoopStartupHooks, StartupHooks},
    },
    routes,
};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub log: Arc<MemoryEventLog>,
}

impl TestApp {
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }
}

pub fn test_config() -> Result<Config> {
    let mut file = NamedTempFile::new()?;
    file.write_all(
        br#"
        [committer]
        record_utc_offset = "Z"

        [fanout]
        block_ms = 50
        observer_buffer = 16

        [retry]
        backoff_base_ms = 5
        backoff_max_ms = 20
        "#,
    )?;

    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(EnvConfig::default(), false)?;
    Ok(load.config)
}

pub async fn build_test_app() -> Result<TestApp> {
    build_test_app_with_hooks(&NoopStartupHooks).await
}

pub async fn build_test_app_with_hooks<H>(hooks: &H) -> Result<TestApp>
where
    H: StartupHooks,
{
    build_test_app_over(Arc::new(MemoryEventLog::default()), hooks).await
}

/// Router over an in-memory log shared by the gate and the live bridge.
pub async fn build_test_app_over<H>(
    log: Arc<MemoryEventLog>,
    hooks: &H,
) -> Result<TestApp>
where
    H: StartupHooks,
{
    let config = Arc::new(test_config()?);
    let shared: Arc<dyn EventLog> = log.clone();

    let state = AppState::new(
        config,
        Arc::clone(&shared),
        shared,
        CancellationToken::new(),
    );
    hooks.run(&state).await?;

    let server = TestServer::builder()
        .http_transport()
        .build(routes::create_app(state.clone()))
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(TestApp { server, state, log })
}
