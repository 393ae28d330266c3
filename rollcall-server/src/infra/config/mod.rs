//! Layered configuration: `.env`, optional TOML file, environment, then CLI
//! overrides applied by the binary.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions,
};
pub use models::{
    CommitterSettings, Config, ConfigMetadata, CorsConfig, DatabaseConfig,
    EventLogConfig, FanoutSettings, RecordOffset, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
