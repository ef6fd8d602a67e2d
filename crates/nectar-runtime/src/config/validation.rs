//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BotConfig, DispatcherSettings, LogOutput, LoggingConfig, NectarConfig, PollingSettings,
    RateLimitSettings, RetryConfig, UpdateMode, WebhookSettings,
};

/// Validates the entire configuration.
///
/// The bot token is not checked here: it may be supplied after loading and
/// is enforced when the runtime starts.
pub fn validate_config(config: &NectarConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_polling_config(&config.polling)?;
    validate_dispatcher_config(&config.dispatcher)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_logging_config(&config.logging)?;
    if config.mode == UpdateMode::Webhook {
        validate_webhook_config(&config.webhook)?;
    }
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    validate_url(&bot.api_url)?;
    if bot.request_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Request timeout must be greater than 0",
        ));
    }
    if let Some(token) = &bot.token
        && token.trim().is_empty()
    {
        return Err(ConfigError::missing_field("bot.token"));
    }
    Ok(())
}

fn validate_polling_config(polling: &PollingSettings) -> ConfigResult<()> {
    if !(1..=100).contains(&polling.limit) {
        return Err(ConfigError::validation(format!(
            "Polling limit must be between 1 and 100, got {}",
            polling.limit
        )));
    }
    validate_retry_config(&polling.retry)
}

/// Validates retry configuration.
fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_dispatcher_config(dispatcher: &DispatcherSettings) -> ConfigResult<()> {
    if dispatcher.workers == 0 {
        return Err(ConfigError::validation("Worker count must be greater than 0"));
    }
    if dispatcher.queue_capacity == Some(0) {
        return Err(ConfigError::validation(
            "Queue capacity must be greater than 0; omit it for an unbounded queue",
        ));
    }
    Ok(())
}

fn validate_rate_limit_config(rate_limit: &RateLimitSettings) -> ConfigResult<()> {
    if rate_limit.max_in_flight == 0 {
        return Err(ConfigError::validation(
            "Rate limit max_in_flight must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_webhook_config(webhook: &WebhookSettings) -> ConfigResult<()> {
    validate_port(webhook.port)?;
    validate_path(&webhook.path)?;
    if webhook.host.is_empty() {
        return Err(ConfigError::missing_field("webhook.host"));
    }
    if let Some(url) = &webhook.public_url {
        validate_url(url)?;
    }
    if let Some(secret) = &webhook.secret_token
        && !is_valid_secret_token(secret)
    {
        return Err(ConfigError::validation(
            "Webhook secret token must be 1-256 characters of A-Z, a-z, 0-9, _ and -",
        ));
    }
    Ok(())
}

/// Validates an HTTP(S) URL.
fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("url"));
    }

    let valid_schemes = ["http://", "https://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    Ok(())
}

fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

/// The listener adds a leading `/` itself. Characters that cannot appear
/// unencoded in a request path are rejected.
fn validate_path(path: &str) -> ConfigResult<()> {
    if path.trim_matches('/').is_empty() && path != "/" {
        return Err(ConfigError::missing_field("webhook.path"));
    }
    if path.contains(char::is_whitespace) {
        return Err(ConfigError::validation("Webhook path cannot contain spaces"));
    }
    if let Some(c) = path.chars().find(|c| matches!(c, '{' | '}' | '?' | '#')) {
        return Err(ConfigError::validation(format!(
            "Webhook path cannot contain '{c}'"
        )));
    }
    Ok(())
}

fn is_valid_secret_token(secret: &str) -> bool {
    (1..=256).contains(&secret.len())
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
