use thiserror::Error;

use super::models::Config;

/// A non-fatal configuration problem worth surfacing at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("stream and group names must not be blank")]
    BlankLogName,
}

/// Reject settings that would make the pipeline spin or stall, and warn
/// about ones that are merely suspicious.
pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("committer.batch_size", config.committer.batch_size),
        ("committer.instances", config.committer.instances),
        ("fanout.count", config.fanout.count),
        ("fanout.observer_buffer", config.fanout.observer_buffer),
        ("log.capacity", config.log.capacity),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::Zero { field });
        }
    }

    if config.log.stream.trim().is_empty() || config.log.group.trim().is_empty()
    {
        return Err(ConfigGuardRailError::BlankLogName);
    }

    if config.committer.reclaim_idle <= config.committer.claim_block {
        warnings.push_with_hint(
            "reclaim idle time does not exceed the claim block; live consumers \
             may steal each other's in-flight batches",
            "Set RECLAIM_IDLE_MS well above CLAIM_BLOCK_MS",
        );
    }

    if config.retry.backoff_max_ms < config.retry.backoff_base_ms {
        warnings.push(
            "backoff maximum is below the base delay; every retry waits the \
             maximum",
        );
    }

    if config.cors.is_wildcard_included()
        && config.cors.allowed_origins.len() > 1
    {
        warnings.push(
            "CORS origin list contains '*' alongside explicit origins; '*' \
             wins",
        );
    }

    Ok(warnings)
}
