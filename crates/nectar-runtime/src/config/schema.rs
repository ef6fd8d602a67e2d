//! Configuration schema definitions.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a complete [`NectarConfig`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use nectar_core::{OverflowPolicy, QueueConfig, UpdateType};
use nectar_transport::{
    DEFAULT_API_URL, HttpTransportConfig, PollingConfig, RateLimitConfig, WebhookConfig,
};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NectarConfig {
    /// How updates are received.
    #[serde(default)]
    pub mode: UpdateMode,

    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub webhook: WebhookSettings,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Update source selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Polling,
    Webhook,
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => f.write_str("polling"),
            Self::Webhook => f.write_str("webhook"),
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Remote API access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot token; required to start the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// API server base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BotConfig {
    pub fn to_transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            api_url: self.api_url.clone(),
            token: self.token.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

// =============================================================================
// Polling
// =============================================================================

/// Long-poll settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Updates per request (1-100).
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Server-side long-poll timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Remove a registered webhook before polling.
    #[serde(default = "default_true")]
    pub delete_webhook: bool,

    /// Drop updates queued on the server while the bot was offline.
    #[serde(default)]
    pub drop_pending_updates: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_updates: Option<Vec<UpdateType>>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            timeout_secs: default_timeout_secs(),
            delete_webhook: true,
            drop_pending_updates: false,
            allowed_updates: None,
            retry: RetryConfig::default(),
        }
    }
}

impl PollingSettings {
    pub fn to_polling_config(&self) -> PollingConfig {
        PollingConfig {
            limit: self.limit,
            timeout: Duration::from_secs(self.timeout_secs),
            allowed_updates: self.allowed_updates.clone(),
            retry: self.retry.to_core_retry(),
            initial_offset: 0,
        }
    }
}

fn default_limit() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failures retried with a growing delay before the delay is pinned at
    /// `max_delay_ms`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to core retry config.
    pub fn to_core_retry(&self) -> nectar_core::RetryConfig {
        nectar_core::RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook listener and registration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the update endpoint.
    #[serde(default = "default_webhook_path")]
    pub path: String,

    /// Public HTTPS URL registered with `setWebhook`. Left unset, the
    /// webhook is assumed to be registered already.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// PEM certificate uploaded with `setWebhook`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,

    /// Shared secret checked on every push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    #[serde(default)]
    pub drop_pending_updates: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_webhook_path(),
            public_url: None,
            certificate: None,
            secret_token: None,
            max_connections: None,
            drop_pending_updates: false,
        }
    }
}

impl WebhookSettings {
    /// `host:port` of the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn to_webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            addr: self.bind_addr(),
            path: self.path.clone(),
            secret_token: self.secret_token.clone(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Queue overflow behaviour, as written in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowSetting {
    #[default]
    Block,
    DropNewest,
    DropOldest,
}

impl From<OverflowSetting> for OverflowPolicy {
    fn from(setting: OverflowSetting) -> Self {
        match setting {
            OverflowSetting::Block => Self::Block,
            OverflowSetting::DropNewest => Self::DropNewest,
            OverflowSetting::DropOldest => Self::DropOldest,
        }
    }
}

/// Worker pool and queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue bound; unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    #[serde(default)]
    pub overflow: OverflowSetting,

    /// Recent update ids remembered for duplicate detection.
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,

    /// How long shutdown waits for queued updates to drain.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: None,
            overflow: OverflowSetting::default(),
            dedupe_window: default_dedupe_window(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DispatcherSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            overflow: self.overflow.into(),
            dedupe_window: self.dedupe_window,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_workers() -> usize {
    nectar_core::dispatcher::DEFAULT_WORKERS
}

fn default_dedupe_window() -> usize {
    nectar_core::queue::DEFAULT_DEDUPE_WINDOW
}

fn default_shutdown_grace_ms() -> u64 {
    10000
}

// =============================================================================
// Rate limit
// =============================================================================

/// Outbound call pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Minimum milliseconds between two call starts.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_in_flight: self.max_in_flight,
            min_interval: Duration::from_millis(self.min_interval_ms),
        }
    }
}

fn default_max_in_flight() -> usize {
    30
}

fn default_min_interval_ms() -> u64 {
    50
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, for `output = "file"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `nectar_transport = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of each event.
    #[serde(default)]
    pub file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
        }
    }
}
