use crate::config::types::{
    Config, CrawlerConfig, CredentialsConfig, OutputConfig, RetryConfig, SourceConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest id batch the content API accepts in a single detail call
pub const MAX_DETAIL_BATCH: usize = 50;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_credentials_config(&config.credentials)?;
    validate_source_config(&config.source)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.detail_batch_size < 1 || config.detail_batch_size > MAX_DETAIL_BATCH {
        return Err(ConfigError::Validation(format!(
            "detail-batch-size must be between 1 and {}, got {}",
            MAX_DETAIL_BATCH, config.detail_batch_size
        )));
    }

    if config.search_max_results < 1 {
        return Err(ConfigError::Validation(
            "search-max-results must be >= 1".to_string(),
        ));
    }

    if config.backlog_page_size < 1 {
        return Err(ConfigError::Validation(
            "backlog-page-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the backoff schedule
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "retry max-attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry backoff-multiplier must be >= 1.0, got {}",
            config.backoff_multiplier
        )));
    }

    if config.max_delay_ms < config.initial_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry max-delay-ms ({}) must not be below initial-delay-ms ({})",
            config.max_delay_ms, config.initial_delay_ms
        )));
    }

    Ok(())
}

fn validate_credentials_config(config: &CredentialsConfig) -> Result<(), ConfigError> {
    if config.daily_budget < 1 {
        return Err(ConfigError::Validation(format!(
            "daily-budget must be >= 1, got {}",
            config.daily_budget
        )));
    }
    if matches!(config.keys_file.as_deref(), Some(path) if path.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "keys-file must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

/// Validates the content API endpoint
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
