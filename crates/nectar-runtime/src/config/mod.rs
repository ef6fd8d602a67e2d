//! Configuration module for the Nectar runtime.
//!
//! Layered TOML / environment configuration loading and validation for the
//! bot, the update source, the dispatcher, rate limiting and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, DispatcherSettings, LogFormat, LogLevel, LogOutput, LoggingConfig, NectarConfig,
    OverflowSetting, PollingSettings, RateLimitSettings, RetryConfig, SpanEventConfig, UpdateMode,
    WebhookSettings,
};
pub use validation::validate_config;
