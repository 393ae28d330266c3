use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::infra::app_state::AppState;

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState) -> Result<()>;
}

/// Bootstraps the consumer group so entries appended before the first
/// worker starts are still delivered to it. An unreachable log does not
/// stop the server; committers create the group themselves once it is back.
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState) -> Result<()> {
        let group = &state.config().log.group;
        match state.event_log().ensure_group(group).await {
            Ok(()) => {
                info!(
                    group = %group,
                    stream = %state.config().log.stream,
                    "Consumer group ready"
                );
                Ok(())
            }
            Err(err) if err.is_transient() => {
                warn!(
                    group = %group,
                    error = %err,
                    "Event log unreachable at startup; serving anyway"
                );
                Ok(())
            }
            Err(err) => Err(err).with_context(|| {
                format!("failed to create consumer group {group}")
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _state: &AppState) -> Result<()> {
        Ok(())
    }
}
